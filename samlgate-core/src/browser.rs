//! Opening the authentication URL in the user's browser.
//!
//! Launching is best effort: a `false` return means the caller should show
//! the URL so the user can open it by hand.

use std::process::{Command, Stdio};

/// Capability to open a URL in a browser.
pub trait BrowserOpener: Send + Sync {
    /// Try to open `url`. Never fails the flow.
    fn open(&self, url: &str) -> bool;
}

/// The platform's default browser launcher, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemBrowser {
    MacOs,
    Windows,
    Linux,
    Unsupported,
}

impl SystemBrowser {
    /// Select the launcher for the operating system this binary runs on.
    pub fn detect() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    pub fn for_os(os: &str) -> Self {
        match os {
            "macos" => SystemBrowser::MacOs,
            "windows" => SystemBrowser::Windows,
            "linux" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => SystemBrowser::Linux,
            _ => SystemBrowser::Unsupported,
        }
    }

    /// Program and leading arguments; the URL is appended last.
    fn command(&self) -> Option<(&'static str, &'static [&'static str])> {
        match self {
            SystemBrowser::MacOs => Some(("open", &[])),
            SystemBrowser::Windows => Some(("rundll32", &["url.dll,FileProtocolHandler"])),
            SystemBrowser::Linux => Some(("xdg-open", &[])),
            SystemBrowser::Unsupported => None,
        }
    }
}

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> bool {
        match self.command() {
            Some((program, args)) => spawn(program, args.iter().copied(), url),
            None => {
                tracing::warn!("No browser launcher for {}", std::env::consts::OS);
                false
            }
        }
    }
}

/// A user-configured browser command, e.g. `["google-chrome", "--new-window"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBrowser {
    program: String,
    args: Vec<String>,
}

impl CommandBrowser {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a command vector; `None` when it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl BrowserOpener for CommandBrowser {
    fn open(&self, url: &str) -> bool {
        spawn(&self.program, self.args.iter().map(String::as_str), url)
    }
}

/// Never opens anything; for `--no-browser` and headless sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBrowser;

impl BrowserOpener for NoBrowser {
    fn open(&self, _url: &str) -> bool {
        false
    }
}

impl<T: BrowserOpener + ?Sized> BrowserOpener for Box<T> {
    fn open(&self, url: &str) -> bool {
        (**self).open(url)
    }
}

fn spawn<'a>(program: &str, args: impl Iterator<Item = &'a str>, url: &str) -> bool {
    let result = Command::new(program)
        .args(args)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match result {
        Ok(_) => {
            tracing::debug!(program, "Launched browser");
            true
        }
        Err(e) => {
            tracing::warn!("Error opening browser with {}: {}", program, e);
            false
        }
    }
}
