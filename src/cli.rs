use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dndcpd", about = "Guest-side drag-and-drop and clipboard sharing service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the guest service
    Run {
        /// Socket path [default: $XDG_RUNTIME_DIR/dndcp/guest.sock]
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Directory under which staging directories are created
        /// [default: <tmp>/dndcp-staging]
        #[arg(long)]
        staging_root: Option<PathBuf>,

        /// How long to wait for a guest drag after the host asks (ms)
        #[arg(long, default_value_t = 500)]
        ungrab_timeout_ms: u64,

        /// Start with drag-and-drop disallowed
        #[arg(long)]
        dnd_disabled: bool,

        /// Start with clipboard sharing disallowed
        #[arg(long)]
        copypaste_disabled: bool,
    },

    /// Connect to a running service as a UI peer and report the handshake
    Status {
        /// Socket path [default: $XDG_RUNTIME_DIR/dndcp/guest.sock]
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Keep the connection open and print notifications
        #[arg(long)]
        watch: bool,
    },
}
