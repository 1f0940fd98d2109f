//! Show command - displays information.

use anyhow::Result;

use devwin::config::Config;
use devwin::platform;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
            println!("  Platform adapter: {}", platform::host(config).name());
        }
    }
    Ok(())
}
