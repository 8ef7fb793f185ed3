//! Command-line surface, following the teacher's `#[derive(Parser)]`
//! `Options` shape.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "mux-daemon",
    version,
    about = "Multiplex NMEA-0183 and Seatalk-1 instrumentation buses"
)]
pub struct Options {
    /// Path to the device graph definition.
    #[arg(long, default_value = "devices.json")]
    pub devices: PathBuf,

    /// Path to the daemon-wide configuration (logger, watchdog).
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
}
