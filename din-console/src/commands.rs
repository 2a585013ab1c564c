//! Console command parsing and execution
//!
//! Numbers are hexadecimal, as on the rack's MIB command set:
//!
//! ```text
//! path set 00 01 83     route channel 0 through bus 1, loads 0, 1 and 7
//! path set 00 01        tear the request down (mask defaults to 0)
//! path get 00           -> "01 83"
//! path get              -> every active path
//! loads set 04 83       replace bus 4's load mask
//! loads get 04          -> "FF 83" (populated, energized)
//! loads get             -> every bus
//! reset                 tear down every path
//! status                active paths and bus states
//! ```

use din_matrix::{BusId, DutChannel, LoadMask, Matrix, MatrixError};
use thiserror::Error;

/// Errors from parsing a console line
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Nothing on the line
    #[error("empty command")]
    Empty,

    /// First word is not a known command
    #[error("unknown command: {0}")]
    Unknown(String),

    /// Wrong number of arguments
    #[error("usage: {0}")]
    Usage(&'static str),

    /// An argument is not valid hex or is out of range
    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetPath {
        channel: DutChannel,
        bus: BusId,
        mask: LoadMask,
    },
    GetPath(Option<DutChannel>),
    SetLoads {
        bus: BusId,
        mask: LoadMask,
    },
    GetLoads(Option<BusId>),
    Reset,
    Status,
    Quit,
}

const PATH_SET_USAGE: &str = "path set <channel> <bus> [mask]";
const PATH_GET_USAGE: &str = "path get [channel]";
const LOADS_SET_USAGE: &str = "loads set <bus> <mask>";
const LOADS_GET_USAGE: &str = "loads get [bus]";

fn hex_u8(word: &str) -> Result<u8, CommandError> {
    u8::from_str_radix(word, 16).map_err(|_| CommandError::InvalidNumber(word.to_string()))
}

fn hex_mask(word: &str) -> Result<LoadMask, CommandError> {
    u32::from_str_radix(word, 16)
        .map(LoadMask)
        .map_err(|_| CommandError::InvalidNumber(word.to_string()))
}

impl Command {
    /// Parse one console line
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let lowered: Vec<String> = words.iter().take(2).map(|w| w.to_ascii_lowercase()).collect();

        match lowered.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            [] => Err(CommandError::Empty),
            ["path", "set", ..] => match words[2..] {
                [c, b] => Ok(Command::SetPath {
                    channel: DutChannel(hex_u8(c)?),
                    bus: BusId(hex_u8(b)?),
                    mask: LoadMask::NONE,
                }),
                [c, b, m] => Ok(Command::SetPath {
                    channel: DutChannel(hex_u8(c)?),
                    bus: BusId(hex_u8(b)?),
                    mask: hex_mask(m)?,
                }),
                _ => Err(CommandError::Usage(PATH_SET_USAGE)),
            },
            ["path", "get", ..] => match words[2..] {
                [] => Ok(Command::GetPath(None)),
                [c] => Ok(Command::GetPath(Some(DutChannel(hex_u8(c)?)))),
                _ => Err(CommandError::Usage(PATH_GET_USAGE)),
            },
            ["loads", "set", ..] => match words[2..] {
                [b, m] => Ok(Command::SetLoads {
                    bus: BusId(hex_u8(b)?),
                    mask: hex_mask(m)?,
                }),
                _ => Err(CommandError::Usage(LOADS_SET_USAGE)),
            },
            ["loads", "get", ..] => match words[2..] {
                [] => Ok(Command::GetLoads(None)),
                [b] => Ok(Command::GetLoads(Some(BusId(hex_u8(b)?)))),
                _ => Err(CommandError::Usage(LOADS_GET_USAGE)),
            },
            ["reset"] => Ok(Command::Reset),
            ["status"] => Ok(Command::Status),
            ["quit"] | ["exit"] => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(line.trim().to_string())),
        }
    }

    /// Run the command and format the reply
    pub fn execute(&self, matrix: &Matrix) -> Result<String, MatrixError> {
        match self {
            Command::SetPath { channel, bus, mask } => {
                let status = matrix.set_matrix_path(*channel, *bus, *mask)?;
                Ok(status.to_string())
            }
            Command::GetPath(Some(channel)) => Ok(matrix.get_matrix_path(*channel)),
            Command::GetPath(None) => Ok(matrix.get_all_matrix_paths()),
            Command::SetLoads { bus, mask } => {
                matrix.set_bus_loads(*bus, *mask)?;
                Ok(String::new())
            }
            Command::GetLoads(Some(bus)) => Ok(matrix.get_bus_loads(*bus)?.to_string()),
            Command::GetLoads(None) => Ok(matrix
                .get_all_bus_loads()
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" ")),
            Command::Reset => {
                matrix.reset()?;
                Ok(String::new())
            }
            Command::Status => {
                let mut lines = Vec::new();
                for bus in matrix.bus_ids() {
                    let report = matrix.get_bus_loads(bus)?;
                    lines.push(format!(
                        "{bus} [{}] {} loads={}",
                        matrix.load_type(bus)?,
                        matrix.bus_status(bus)?,
                        report.state
                    ));
                }
                for path in matrix.active_paths() {
                    lines.push(path.to_string());
                }
                Ok(lines.join("\n"))
            }
            Command::Quit => Ok(String::new()),
        }
    }
}
