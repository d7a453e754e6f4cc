use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "sparkled",
    author,
    version,
    about = "Particle screensaver host for the sparkle renderer"
)]
pub struct Cli {
    /// Scene configuration file. Defaults to `scene.toml` in the config directory.
    #[arg(long, value_name = "FILE", env = "SPARKLED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Window or offscreen size in physical pixels (e.g. `1280x720`).
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_parser = parse_size,
        default_value = "1280x720"
    )]
    pub size: (u32, u32),

    /// Override the particle simulation backend from the scene file.
    #[arg(long, value_enum, value_name = "BACKEND")]
    pub simulation: Option<SimulationArg>,

    /// Stop after this many frames (headless runs default to 120).
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u64>,

    /// Render offscreen without opening a window.
    #[arg(long)]
    pub headless: bool,

    /// Validate the scene configuration, print a summary, and exit.
    #[arg(long)]
    pub check_config: bool,

    /// Seed for the particle emitter; random when omitted.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimulationArg {
    Cpu,
    Gpu,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| "invalid width".to_string())?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| "invalid height".to_string())?;
    if width == 0 || height == 0 {
        return Err("size must be greater than zero".into());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1920x1080").unwrap(), (1920, 1080));
        assert_eq!(parse_size(" 64 X 32 ").unwrap(), (64, 32));
        assert!(parse_size("1920").is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn parses_headless_run() {
        let cli = Cli::try_parse_from([
            "sparkled",
            "--headless",
            "--frames",
            "10",
            "--size",
            "320x200",
            "--simulation",
            "gpu",
        ])
        .expect("parse args");
        assert!(cli.headless);
        assert_eq!(cli.frames, Some(10));
        assert_eq!(cli.size, (320, 200));
        assert_eq!(cli.simulation, Some(SimulationArg::Gpu));
        assert!(!cli.check_config);
    }

    #[test]
    fn rejects_unknown_simulation_backend() {
        assert!(Cli::try_parse_from(["sparkled", "--simulation", "tpu"]).is_err());
    }
}
