use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "engineport", version, about = "Compile graphs into accelerator engines and run them")]
pub struct Cli {
    /// Log level (RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    /// Simulated device capability as MAJOR.MINOR; repeat for more devices
    #[arg(long = "device", global = true, default_value = "8.6")]
    pub devices: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the devices the driver reports
    Devices,

    /// Compile a JSON graph description into an engine file
    Compile {
        /// Graph description (JSON)
        graph: PathBuf,

        /// Output engine file
        #[arg(short, long, default_value = "model.engine")]
        output: PathBuf,

        /// Optional build config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Device to build for
        #[arg(long, default_value_t = 0)]
        target: i32,

        /// Treat graph input dims of -1 as unknown until run time
        #[arg(long)]
        dynamic_shape: bool,
    },

    /// Print the device record and bindings of an engine file
    Inspect {
        /// Engine file
        engine: PathBuf,
    },

    /// Execute an engine file against JSON inputs
    Run {
        /// Engine file
        engine: PathBuf,

        /// JSON array of `{"shape": [...], "values": [...]}` tensors
        #[arg(long)]
        inputs: PathBuf,
    },
}
