//! launchd boot agent for macOS
//!
//! Stands in for the device-restart broadcast: the agent runs `nl boot` at login,
//! which restarts the listener from its persisted config when it was running before.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Settings;

/// Boot agent status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub installed: bool,
    pub loaded: bool,
}

/// launchd agent that triggers `restart_after_external_trigger` at login
pub struct BootAgent {
    plist_path: PathBuf,
    log_dir: PathBuf,
    data_dir: PathBuf,
}

impl BootAgent {
    pub const LABEL: &'static str = "com.notification-listener.boot";

    pub fn new(settings: &Settings) -> Result<Self> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        let plist_path = home
            .join("Library/LaunchAgents")
            .join(format!("{}.plist", Self::LABEL));
        Ok(Self::with_paths(plist_path, settings))
    }

    pub fn with_paths(plist_path: PathBuf, settings: &Settings) -> Self {
        Self {
            plist_path,
            log_dir: settings.log_dir(),
            data_dir: settings.data_dir.clone(),
        }
    }

    pub fn plist_path(&self) -> &Path {
        &self.plist_path
    }

    /// Render the agent plist for the given binary
    pub fn render_plist(&self, binary: &Path) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{binary}</string>
        <string>boot</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <false/>
    <key>StandardOutPath</key>
    <string>{stdout}</string>
    <key>StandardErrorPath</key>
    <string>{stderr}</string>
    <key>EnvironmentVariables</key>
    <dict>
        <key>NL_DATA_DIR</key>
        <string>{data_dir}</string>
    </dict>
</dict>
</plist>
"#,
            label = Self::LABEL,
            binary = binary.display(),
            stdout = self.log_dir.join("boot.stdout.log").display(),
            stderr = self.log_dir.join("boot.stderr.log").display(),
            data_dir = self.data_dir.display(),
        )
    }

    /// Write the plist and load it
    pub fn install(&self) -> Result<()> {
        let binary = std::env::current_exe().context("Failed to get current executable path")?;

        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        if let Some(parent) = self.plist_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create LaunchAgents directory")?;
        }
        std::fs::write(&self.plist_path, self.render_plist(&binary))
            .context("Failed to write plist file")?;

        if let Err(e) = self.launchctl("load") {
            let _ = std::fs::remove_file(&self.plist_path);
            return Err(e);
        }
        Ok(())
    }

    pub fn uninstall(&self) -> Result<()> {
        if !self.plist_path.exists() {
            return Ok(());
        }
        let _ = self.launchctl("unload");
        std::fs::remove_file(&self.plist_path).context("Failed to remove plist file")?;
        Ok(())
    }

    pub fn status(&self) -> Result<AgentStatus> {
        if !self.plist_path.exists() {
            return Ok(AgentStatus { installed: false, loaded: false });
        }
        let output = Command::new("launchctl")
            .args(["list", Self::LABEL])
            .output()
            .context("Failed to execute launchctl list")?;
        Ok(AgentStatus {
            installed: true,
            loaded: output.status.success(),
        })
    }

    fn launchctl(&self, verb: &str) -> Result<()> {
        let status = Command::new("launchctl")
            .arg(verb)
            .arg(&self.plist_path)
            .status()
            .with_context(|| format!("Failed to execute launchctl {}", verb))?;
        if !status.success() {
            anyhow::bail!("launchctl {} failed with status: {}", verb, status);
        }
        Ok(())
    }
}
