use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use plotters::style::RGBColor;
use polars::prelude::*;
use regex::Regex;

lazy_static! {
    static ref HEX_COLOUR: Regex = Regex::new(r"^#([0-9a-f]{2})([0-9a-f]{2})([0-9a-f]{2})$").unwrap();
}

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

/// Read an Arrow IPC (feather v2) file, keeping its record batches as separate chunks.
pub fn read_ipc(file_path: &Path) -> PolarsResult<DataFrame> {
    let file = File::open(file_path)?;
    IpcReader::new(file).set_rechunk(false).finish()
}

/// Resolve a matplotlib-style colour name or `#rrggbb` hex string.
pub fn parse_colour(name: &str) -> Option<RGBColor> {
    let name = name.trim().to_ascii_lowercase();
    if let Some(caps) = HEX_COLOUR.captures(&name) {
        let channel = |i: usize| u8::from_str_radix(&caps[i], 16).ok();
        return Some(RGBColor(channel(1)?, channel(2)?, channel(3)?));
    }

    let rgb = match name.as_str() {
        "black" | "k" => RGBColor(0, 0, 0),
        "white" | "w" => RGBColor(255, 255, 255),
        "red" | "r" => RGBColor(255, 0, 0),
        "green" | "g" => RGBColor(0, 128, 0),
        "blue" | "b" => RGBColor(0, 0, 255),
        "dimgrey" | "dimgray" => RGBColor(105, 105, 105),
        "grey" | "gray" => RGBColor(128, 128, 128),
        "darkgrey" | "darkgray" => RGBColor(169, 169, 169),
        "lightgrey" | "lightgray" => RGBColor(211, 211, 211),
        "orange" => RGBColor(255, 165, 0),
        "purple" => RGBColor(128, 0, 128),
        "navy" => RGBColor(0, 0, 128),
        "teal" => RGBColor(0, 128, 128),
        "darkred" => RGBColor(139, 0, 0),
        "darkblue" => RGBColor(0, 0, 139),
        "darkgreen" => RGBColor(0, 100, 0),
        "magenta" | "m" => RGBColor(255, 0, 255),
        "cyan" | "c" => RGBColor(0, 255, 255),
        "gold" => RGBColor(255, 215, 0),
        "brown" => RGBColor(165, 42, 42),
        "pink" => RGBColor(255, 192, 203),
        "steelblue" => RGBColor(70, 130, 180),
        "tab:blue" => RGBColor(31, 119, 180),
        "tab:orange" => RGBColor(255, 127, 14),
        "tab:red" => RGBColor(214, 39, 40),
        _ => return None,
    };
    Some(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colours_by_name_and_hex() {
        assert_eq!(parse_colour("dimgrey"), Some(RGBColor(105, 105, 105)));
        assert_eq!(parse_colour(" Red "), Some(RGBColor(255, 0, 0)));
        assert_eq!(parse_colour("#1F77B4"), Some(RGBColor(31, 119, 180)));
        assert_eq!(parse_colour("#12345"), None);
        assert_eq!(parse_colour("chartreuse-ish"), None);
    }

    #[test]
    fn shared_hex_pattern_serves_repeated_lookups() {
        for v in 0..=255u8 {
            let hex = format!("#{v:02x}{v:02X}00");
            assert_eq!(parse_colour(&hex), Some(RGBColor(v, v, 0)));
        }
        assert_eq!(parse_colour("#gg0000"), None);
        assert_eq!(parse_colour("x#ff0000"), None);
    }
}
