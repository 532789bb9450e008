//! Session collaborator.
//!
//! The core never stores credentials itself; it asks an [`AuthProvider`] for
//! the bearer token and tells it when the server rejected the session.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "api::auth";

pub trait AuthProvider: Send + Sync {
    /// Current bearer token, if signed in.
    fn token(&self) -> Option<String>;

    /// Called when the server answered 401.
    fn redirect_to_login(&self);

    /// Called after a successful sign-in.
    fn store_token(&self, _token: &str) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory session. Counts how often the server sent the user back to
/// sign-in.
#[derive(Debug, Default)]
pub struct SessionToken {
    token: Mutex<Option<String>>,
    redirects: AtomicUsize,
}

impl SessionToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
            redirects: AtomicUsize::new(0),
        }
    }

    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl AuthProvider for SessionToken {
    fn token(&self) -> Option<String> {
        mutex_lock(&self.token, SOURCE, "token").clone()
    }

    fn redirect_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
        mutex_lock(&self.token, SOURCE, "redirect_to_login").take();
    }

    fn store_token(&self, token: &str) -> io::Result<()> {
        *mutex_lock(&self.token, SOURCE, "store_token") = Some(token.to_string());
        Ok(())
    }
}

/// Session persisted in a token file between CLI invocations.
#[derive(Debug)]
pub struct TokenFile {
    path: PathBuf,
    token: Mutex<Option<String>>,
}

impl TokenFile {
    /// Load the token from `path`; a missing or empty file means signed out.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let token = match fs::read_to_string(&path) {
            Ok(contents) => Some(contents.trim().to_string()).filter(|token| !token.is_empty()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        Ok(Self {
            path,
            token: Mutex::new(token),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuthProvider for TokenFile {
    fn token(&self) -> Option<String> {
        mutex_lock(&self.token, SOURCE, "token").clone()
    }

    fn redirect_to_login(&self) {
        mutex_lock(&self.token, SOURCE, "redirect_to_login").take();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "Failed to remove token file"),
        }
        warn!("Session rejected by the server; sign in again with `vitrine login`");
    }

    fn store_token(&self, token: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token)?;
        *mutex_lock(&self.token, SOURCE, "store_token") = Some(token.to_string());
        info!(path = %self.path.display(), "Stored session token");
        Ok(())
    }
}
