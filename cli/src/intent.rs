use std::str::FromStr;

use anyhow::{Result, anyhow};
use common::point::Point;
use common::{DetectiveGadget, MrXGadget};

/// A line typed into `mrx play`.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SelectTeam(u32),
    /// Toggle riding the train with this line id.
    Train(String),
    /// Walk to the stop with this id.
    Stop(String),
    Disembark,
    Position(Point),
    MrXGadget(MrXGadget),
    DetectiveGadget(DetectiveGadget),
    Message(String),
    Status,
    Quit,
}

impl FromStr for Intent {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let intent = match word.to_ascii_lowercase().as_str() {
            "team" => Intent::SelectTeam(rest.parse().map_err(|_| anyhow!("usage: team <id>"))?),
            "train" => Intent::Train(argument(rest, "train <line id>")?),
            "stop" => Intent::Stop(argument(rest, "stop <stop id>")?),
            "disembark" | "off" => Intent::Disembark,
            "msg" | "say" => Intent::Message(argument(rest, "msg <text>")?),
            "mrx" => Intent::MrXGadget(parse_mr_x_gadget(rest)?),
            "detective" => Intent::DetectiveGadget(parse_detective_gadget(rest)?),
            "status" => Intent::Status,
            "quit" | "exit" => Intent::Quit,
            _ => Intent::Position(parse_position(line)?),
        };
        Ok(intent)
    }
}

fn argument(rest: &str, usage: &str) -> Result<String> {
    if rest.is_empty() {
        return Err(anyhow!("usage: {usage}"));
    }
    Ok(rest.to_string())
}

fn parse_mr_x_gadget(rest: &str) -> Result<MrXGadget> {
    let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match name.to_ascii_lowercase().as_str() {
        "facts" | "alternative-facts" => Ok(MrXGadget::AlternativeFacts {
            stop_id: argument(arg.trim(), "mrx facts <stop id>")?,
        }),
        "notfound" | "not-found" => Ok(MrXGadget::NotFound),
        "teleport" => Ok(MrXGadget::Teleport),
        "shifter" => Ok(MrXGadget::Shifter),
        _ => Err(anyhow!("usage: mrx facts <stop id> | notfound | teleport | shifter")),
    }
}

fn parse_detective_gadget(rest: &str) -> Result<DetectiveGadget> {
    let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match name.to_ascii_lowercase().as_str() {
        "stop" => Ok(DetectiveGadget::Stop {
            stop_id: argument(arg.trim(), "detective stop <stop id>")?,
        }),
        "outoforder" | "out-of-order" => Ok(DetectiveGadget::OutOfOrder),
        "shackles" => Ok(DetectiveGadget::Shackles),
        _ => Err(anyhow!("usage: detective stop <stop id> | outoforder | shackles")),
    }
}

/// `<lat>,<long>` as the location service reports it.
fn parse_position(line: &str) -> Result<Point> {
    let (lat, long) = line
        .split_once(',')
        .ok_or_else(|| anyhow!("unknown command {line:?}"))?;
    let lat: f64 = lat.trim().parse().map_err(|_| anyhow!("invalid latitude {lat:?}"))?;
    let long: f64 = long.trim().parse().map_err(|_| anyhow!("invalid longitude {long:?}"))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&long) {
        return Err(anyhow!("position {lat},{long} is out of range"));
    }
    Ok(Point::new(lat, long))
}
