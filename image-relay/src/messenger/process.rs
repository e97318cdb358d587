//! Out-of-process transport: each page context is a `page-agent` child.
//!
//! Requests are written to the child's stdin and replies read from its
//! stdout using native messaging framing. Installing an extractor spawns
//! (or respawns) the child. Any transport failure drops the child so the
//! next install starts clean.
//!
//! An exchange that is cancelled halfway (the caller timed out) leaves the
//! pipe mid-frame or with an unread reply queued, so that child is marked
//! broken and never spoken to again.

use crate::error::MessengerError;
use crate::messenger::framing::{read_json, write_json};
use crate::messenger::{ExtractorInstaller, Messenger, PageRequest, PageResponse};
use crate::types::ContextId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a page-agent needs to know about its page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRegistration {
    pub url: String,
    pub title: String,
    /// Document snapshot file, if one was captured
    pub document: Option<PathBuf>,
}

struct AgentProcess {
    // Held so the child is killed when the process entry is dropped
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

struct AgentSlot {
    process: Mutex<AgentProcess>,
    broken: AtomicBool,
}

impl AgentSlot {
    fn new(process: AgentProcess) -> Self {
        Self {
            process: Mutex::new(process),
            broken: AtomicBool::new(false),
        }
    }
}

/// Marks the slot broken unless the exchange ran to completion
struct ExchangeGuard<'a> {
    slot: &'a AgentSlot,
    armed: bool,
}

impl ExchangeGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.broken.store(true, Ordering::SeqCst);
        }
    }
}

/// Hosts page agents as child processes
pub struct ProcessHost {
    binary_path: PathBuf,
    pages: Mutex<HashMap<ContextId, PageRegistration>>,
    agents: Mutex<HashMap<ContextId, Arc<AgentSlot>>>,
}

impl ProcessHost {
    /// Create a host using the default page-agent binary
    pub fn new() -> Self {
        Self::with_path(Self::default_binary_path())
    }

    pub fn with_path(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            pages: Mutex::new(HashMap::new()),
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Get the default binary path
    pub fn default_binary_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let paths = [
            exe_dir.join("page-agent"),
            // Integration tests run from target/<profile>/deps
            exe_dir.join("../page-agent"),
            PathBuf::from("target/release/page-agent"),
            PathBuf::from("target/debug/page-agent"),
        ];

        for path in paths {
            if path.exists() {
                return path;
            }
        }

        PathBuf::from("page-agent")
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Make a page known to the host; its agent is started on install
    pub async fn register(&self, context: ContextId, page: PageRegistration) {
        self.pages.lock().await.insert(context, page);
    }

    /// Forget a page and stop its agent
    pub async fn unregister(&self, context: ContextId) {
        self.pages.lock().await.remove(&context);
        self.agents.lock().await.remove(&context);
    }

    fn spawn(&self, page: &PageRegistration) -> Result<AgentProcess, MessengerError> {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("--page-url")
            .arg(&page.url)
            .arg("--page-title")
            .arg(&page.title)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(document) = &page.document {
            command.arg("--document").arg(document);
        }

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MessengerError::Protocol("page-agent stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MessengerError::Protocol("page-agent stdout unavailable".to_string()))?;

        Ok(AgentProcess {
            _child: child,
            stdin,
            stdout,
        })
    }

    async fn exchange(
        agent: &mut AgentProcess,
        request: &PageRequest,
    ) -> Result<Option<PageResponse>, MessengerError> {
        write_json(&mut agent.stdin, request).await?;
        read_json(&mut agent.stdout).await
    }

    /// Drop the agent for `context` if it is still `slot`
    async fn evict(&self, context: ContextId, slot: &Arc<AgentSlot>) {
        let mut agents = self.agents.lock().await;
        if agents.get(&context).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            agents.remove(&context);
        }
    }
}

impl Default for ProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Messenger for ProcessHost {
    async fn send(
        &self,
        context: ContextId,
        request: PageRequest,
    ) -> Result<PageResponse, MessengerError> {
        let slot = self
            .agents
            .lock()
            .await
            .get(&context)
            .cloned()
            .ok_or(MessengerError::Unreachable(context))?;

        let mut agent = slot.process.lock().await;
        if slot.broken.load(Ordering::SeqCst) {
            debug!("Page agent {} abandoned mid-exchange, dropping it", context);
            drop(agent);
            self.evict(context, &slot).await;
            return Err(MessengerError::Unreachable(context));
        }

        let guard = ExchangeGuard {
            slot: &slot,
            armed: true,
        };
        let result = Self::exchange(&mut agent, &request).await;
        guard.disarm();
        drop(agent);

        match result {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                debug!("Page agent {} closed its output", context);
                self.evict(context, &slot).await;
                Err(MessengerError::Unreachable(context))
            }
            Err(e) => {
                warn!("Page agent {} failed during {}: {}", context, request.name(), e);
                self.evict(context, &slot).await;
                Err(MessengerError::Unreachable(context))
            }
        }
    }
}

#[async_trait]
impl ExtractorInstaller for ProcessHost {
    async fn install(&self, context: ContextId) -> Result<(), MessengerError> {
        let page = self
            .pages
            .lock()
            .await
            .get(&context)
            .cloned()
            .ok_or(MessengerError::Unreachable(context))?;

        let process = self.spawn(&page)?;
        self.agents
            .lock()
            .await
            .insert(context, Arc::new(AgentSlot::new(process)));

        info!("Started page agent for {} ({})", context, page.url);
        Ok(())
    }
}
