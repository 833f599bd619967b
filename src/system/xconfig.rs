//! X configuration tool.

use crate::config::InstallerOptions;
use crate::system::{find_program, run_command, XConfigTool};

/// Runs `nvidia-xconfig` from the utility prefix or PATH.
#[derive(Debug, Default)]
pub struct NvidiaXConfig;

impl XConfigTool for NvidiaXConfig {
    fn run(&mut self, opts: &InstallerOptions) -> Result<bool, String> {
        let installed = opts.utility_prefix.join("bin/nvidia-xconfig");
        let program = if installed.is_file() {
            installed
        } else {
            find_program("nvidia-xconfig")
                .ok_or_else(|| "nvidia-xconfig could not be found".to_string())?
        };

        let program = program.to_string_lossy();
        run_command(&program, &[])?;
        log::info!("[XConfig] X configuration updated by {}", program);
        Ok(true)
    }
}
