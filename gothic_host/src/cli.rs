use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use gothic_host::HostConfig;

#[derive(Parser, Debug)]
#[command(
    about = "Runs game scripts against an in-memory world and legacy VM",
    version
)]
pub struct Args {
    /// JSON host configuration; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory scanned recursively for .lua scripts
    #[arg(long)]
    pub scripts_dir: Option<PathBuf>,

    /// Manifest of `<type>:<path>` entries loaded before the scripts directory
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Skip the JIT even where the runtime supports it
    #[arg(long)]
    pub no_jit: bool,

    /// Skip the recursive scripts directory scan
    #[arg(long)]
    pub no_mod_scripts: bool,

    /// Console code to run after loading; may be repeated
    #[arg(long)]
    pub exec: Vec<String>,

    /// Read console lines from stdin after --exec
    #[arg(long)]
    pub console: bool,

    /// Restore script storage from a save record before loading scripts
    #[arg(long)]
    pub load_state: Option<PathBuf>,

    /// Write script storage as a save record on exit
    #[arg(long)]
    pub save_state: Option<PathBuf>,

    /// Write script storage as JSON on exit
    #[arg(long)]
    pub state_json: Option<PathBuf>,

    /// Raise the demo gameplay events after loading
    #[arg(long)]
    pub demo_events: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    pub verbose: bool,
}

pub fn parse() -> Result<Args> {
    let args = Args::parse();
    args.validate()?;
    Ok(args)
}

impl Args {
    fn validate(&self) -> Result<()> {
        if let (Some(load), Some(save)) = (&self.load_state, &self.state_json) {
            if load == save {
                bail!("--state-json would overwrite the --load-state record");
            }
        }
        Ok(())
    }

    pub fn host_config(&self) -> Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::load(path)?,
            None => HostConfig::default(),
        };
        if let Some(dir) = &self.scripts_dir {
            config.scripts_dir = dir.clone();
        }
        if let Some(manifest) = &self.manifest {
            config.manifest = Some(manifest.clone());
        }
        if self.no_jit {
            config.enable_jit = false;
        }
        if self.no_mod_scripts {
            config.load_mod_scripts = false;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::Args;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "gothic_host",
            "--scripts-dir",
            "mods",
            "--no-jit",
            "--exec",
            "return 1",
            "--exec",
            "return 2",
        ]);
        let config = args.host_config().expect("config");
        assert_eq!(config.scripts_dir, PathBuf::from("mods"));
        assert!(!config.enable_jit);
        assert!(config.load_mod_scripts);
        assert_eq!(args.exec, vec!["return 1", "return 2"]);
    }

    #[test]
    fn state_json_may_not_clobber_the_loaded_record() {
        let args = Args::parse_from([
            "gothic_host",
            "--load-state",
            "save.bin",
            "--state-json",
            "save.bin",
        ]);
        assert!(args.validate().is_err());
    }
}
