// SPDX-License-Identifier: GPL-3.0-only

//! Operator CLI around the sms-agent library

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use sms_agent::config::DEFAULT_CONFIG_PATH;
use sms_agent::table;
use sms_agent::{Agent, AgentConfig};
use sms_sys::ShellRunner;
use sms_types::{DeviceType, VolumeType};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "sms-agent-cli")]
#[command(about = "Inspect devices and run reservation commands on this host", long_about = None)]
struct Cli {
    /// Agent configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Linear,
    Striped,
    Multipath,
}

impl From<TargetArg> for DeviceType {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::Linear => DeviceType::Linear,
            TargetArg::Striped => DeviceType::Striped,
            TargetArg::Multipath => DeviceType::Multipath,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Linear,
    Striped,
}

impl From<LayoutArg> for VolumeType {
    fn from(value: LayoutArg) -> Self {
        match value {
            LayoutArg::Linear => VolumeType::DmLinear,
            LayoutArg::Striped => VolumeType::DmStriped,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List assembled devices
    Devices {
        /// Only devices with this target type
        #[arg(long, value_enum)]
        target: Option<TargetArg>,
    },
    /// Show one device
    Device {
        /// Device-mapper name
        name: String,
    },
    /// Show registered keys and the reservation of a LUN
    State {
        /// Volume id (wwid or mapper name)
        volume_id: String,
    },
    /// Execute one reservation command given as manager JSON
    Pr {
        /// Request body, e.g. '{"cmd_type":5,"volume_type":"multipath","volume_id":"..."}'
        body: String,
    },
    /// Execute a batch of reservation commands given as manager JSON
    Batch {
        /// Request body with a `cmds` array
        body: String,
    },
    /// Create a linear or striped volume from physical volumes
    Create {
        /// Name of the new volume; must carry the configured prefix
        name: String,
        #[arg(long, value_enum, default_value = "linear")]
        layout: LayoutArg,
        /// Physical volumes, in order
        #[arg(required = true)]
        children: Vec<String>,
    },
    /// Grow an existing volume onto a new set of physical volumes
    Expand {
        name: String,
        #[arg(long, value_enum, default_value = "linear")]
        layout: LayoutArg,
        /// Physical volumes, in order, including the existing ones
        #[arg(required = true)]
        children: Vec<String>,
    },
    /// Remove a volume
    Remove {
        name: String,
    },
}

impl Commands {
    fn mutates(&self) -> bool {
        matches!(
            self,
            Self::Pr { .. }
                | Self::Batch { .. }
                | Self::Create { .. }
                | Self::Expand { .. }
                | Self::Remove { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sms_agent=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.command.mutates() && unsafe { libc::geteuid() } != 0 {
        tracing::error!("reservation and provisioning commands must run as root");
        anyhow::bail!("This command requires root privileges");
    }

    let config = AgentConfig::load(&cli.config)?;
    let agent = Agent::new(config, Arc::new(ShellRunner::new()));

    match cli.command {
        Commands::Devices { target } => {
            let devices = agent.list_devices(target.map(DeviceType::from)).await?;
            println!("{}", serde_json::to_string(&devices)?);
        }
        Commands::Device { name } => {
            let device = agent.get_device(&name).await?;
            println!("{}", serde_json::to_string(&device)?);
        }
        Commands::State { volume_id } => {
            let state = agent.reservation_state(&volume_id).await?;
            println!("{}", serde_json::to_string(&state)?);
        }
        Commands::Pr { body } => {
            println!("{}", agent.handler().handle_pr(&body).await);
        }
        Commands::Batch { body } => {
            println!("{}", agent.handler().handle_batch_pr(&body).await);
        }
        Commands::Create {
            name,
            layout,
            children,
        } => {
            let prefix = &agent.config().linear_name_prefix;
            if !name.starts_with(prefix.as_str()) {
                anyhow::bail!("volume name {name} must start with '{prefix}'");
            }
            let children = agent.describe_children(&children).await?;
            let device = agent
                .mapper()
                .create_from_children(&name, layout.into(), &children)
                .await?;
            println!("{}", serde_json::to_string(&device)?);
        }
        Commands::Expand {
            name,
            layout,
            children,
        } => {
            let children = agent.describe_children(&children).await?;
            let device = match layout {
                LayoutArg::Linear => table::linear_table(&name, &children)?,
                LayoutArg::Striped => table::striped_table(&name, &children)?,
            };
            agent.mapper().expand(&device).await?;
            println!("{}", serde_json::to_string(&device)?);
        }
        Commands::Remove { name } => {
            agent.mapper().remove(&name).await?;
            println!("{{\"success\": true}}");
        }
    }

    Ok(())
}
