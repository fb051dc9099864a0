use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_PATH;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera Index (default 0)
    #[arg(short, long, default_value_t = 0)]
    pub cam_index: u32,

    /// List available cameras
    #[arg(long)]
    pub list: bool,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_PATH)]
    pub config: PathBuf,

    /// Stop after this many published frames (headless runs)
    #[arg(long)]
    pub frames: Option<u64>,

    /// Save the last annotated frame here on exit
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
