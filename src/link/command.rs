use std::fmt;
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::core::{Error, Result};
use crate::store::{UnitId, UnitStore};
use super::frames::transmit_units;
use super::transport::Transport;

/// Length of a command prefix
pub const COMMAND_SIZE: usize = 2;

/// Commands the companion controller can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// `SD`: shut the payload computer down
    Shutdown,
    /// `RE`: reboot
    Reboot,
    /// `SF`: send files to the controller
    SendFile,
    /// `AP`: send specific packets to the controller
    SendPackets,
    /// `HI`: ping
    Ping,
    /// `ST`: assemble and send a status report
    Status,
    /// `CS`: check the sibling computer is alive
    CheckSibling,
    /// `PC`: pipe a command to the sibling computer
    PipeToSibling,
    /// `UC`: reverse ping the controller over the UART
    UartCheck,
}

impl CommandCode {
    /// Every recognised command
    pub const ALL: [CommandCode; 9] = [
        CommandCode::Shutdown,
        CommandCode::Reboot,
        CommandCode::SendFile,
        CommandCode::SendPackets,
        CommandCode::Ping,
        CommandCode::Status,
        CommandCode::CheckSibling,
        CommandCode::PipeToSibling,
        CommandCode::UartCheck,
    ];

    /// Two-letter wire prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            CommandCode::Shutdown => "SD",
            CommandCode::Reboot => "RE",
            CommandCode::SendFile => "SF",
            CommandCode::SendPackets => "AP",
            CommandCode::Ping => "HI",
            CommandCode::Status => "ST",
            CommandCode::CheckSibling => "CS",
            CommandCode::PipeToSibling => "PC",
            CommandCode::UartCheck => "UC",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for CommandCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CommandCode::ALL
            .iter()
            .copied()
            .find(|code| code.prefix().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::format(format!("{:?} is not a command", s)))
    }
}

/// A command split from its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Which command
    pub code: CommandCode,
    /// Remainder of the buffer
    pub args: String,
}

/// How a received buffer should be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// A command for the command handler
    Command(Command),
    /// Anything else is QUIP frames
    Packets,
}

/// Classifies a received buffer by its first two bytes
pub fn route(buffer: &[u8]) -> Routed {
    let code = buffer
        .get(..COMMAND_SIZE)
        .and_then(|prefix| std::str::from_utf8(prefix).ok())
        .and_then(|prefix| prefix.parse::<CommandCode>().ok());

    match code {
        Some(code) => {
            let args = String::from_utf8_lossy(&buffer[COMMAND_SIZE..]).into_owned();
            Routed::Command(Command { code, args })
        }
        None => Routed::Packets,
    }
}

/// What a command handler may touch
pub struct CommandContext<'a> {
    /// Link back to the controller
    pub transport: &'a mut dyn Transport,
    /// Local packet units
    pub store: &'a mut dyn UnitStore,
}

/// Executes commands received over the link
pub trait CommandHandler: Send {
    /// Runs one command
    fn handle(&mut self, command: &Command, ctx: CommandContext<'_>) -> Result<()>;
}

/// Hands a routed command to its handler
pub fn dispatch(
    handler: Option<&mut (dyn CommandHandler + 'static)>,
    command: &Command,
    ctx: CommandContext<'_>,
) -> Result<()> {
    let handler = handler.ok_or_else(|| {
        Error::connection(format!("no command handler registered for {}", command.code))
    })?;
    info!(command = %command.code, args = %command.args, "running command");
    handler.handle(command, ctx)
}

/// Handler for the commands that only need the packet store: `AP` and `HI`
///
/// Everything else belongs to the host system and is logged and ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCommands;

impl CommandHandler for PacketCommands {
    fn handle(&mut self, command: &Command, ctx: CommandContext<'_>) -> Result<()> {
        match command.code {
            CommandCode::SendPackets => {
                let units = requested_units(&command.args, &*ctx.store)?;
                let sent = transmit_units(&*ctx.store, ctx.transport, &units)?;
                debug!(sent, "requested packets transmitted");
                Ok(())
            }
            CommandCode::Ping => ctx.transport.write_all(CommandCode::Ping.prefix().as_bytes()),
            other => {
                warn!(command = %other, "command not handled here");
                Ok(())
            }
        }
    }
}

/// Parses the unit list of an `AP` command. Tokens are `init`, a pid, or an
/// inclusive `first-last` range; no tokens means every stored unit.
pub fn requested_units(args: &str, store: &dyn UnitStore) -> Result<Vec<UnitId>> {
    let tokens: Vec<&str> = args
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return store.units();
    }

    let mut units = Vec::new();
    for token in tokens {
        if token.eq_ignore_ascii_case("init") {
            units.push(UnitId::Init);
            continue;
        }
        let parse = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| Error::format(format!("{:?} is not a packet id", token)))
        };
        match token.split_once('-') {
            Some((first, last)) => {
                let (first, last) = (parse(first)?, parse(last)?);
                if first > last {
                    return Err(Error::format(format!("range {:?} is reversed", token)));
                }
                units.extend((first..=last).map(UnitId::Data));
            }
            None => units.push(UnitId::Data(parse(token)?)),
        }
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::MemoryTransport;
    use crate::store::MemoryStore;

    #[test]
    fn test_route_commands() {
        assert_eq!(
            route(b"HI there"),
            Routed::Command(Command { code: CommandCode::Ping, args: " there".into() })
        );
        assert_eq!(
            route(b"ap0 1"),
            Routed::Command(Command { code: CommandCode::SendPackets, args: "0 1".into() })
        );
        assert_eq!(route(b"SD"), Routed::Command(Command { code: CommandCode::Shutdown, args: String::new() }));
    }

    #[test]
    fn test_route_packets() {
        assert_eq!(route(&[0xFF, 0xFF, 0xAB, 0xCD]), Routed::Packets);
        assert_eq!(route(b"XY"), Routed::Packets);
        assert_eq!(route(b"H"), Routed::Packets);
        assert_eq!(route(b""), Routed::Packets);
    }

    #[test]
    fn test_command_prefixes() {
        for code in CommandCode::ALL {
            assert_eq!(code.prefix().parse::<CommandCode>().unwrap(), code);
        }
        assert!("ZZ".parse::<CommandCode>().is_err());
    }

    #[test]
    fn test_dispatch_without_handler() {
        let mut link = MemoryTransport::new();
        let mut store = MemoryStore::new();
        let command = Command { code: CommandCode::Ping, args: String::new() };
        let ctx = CommandContext { transport: &mut link, store: &mut store };
        assert!(matches!(dispatch(None, &command, ctx), Err(Error::Connection(_))));
    }

    #[test]
    fn test_ping_replies() {
        let mut link = MemoryTransport::new();
        let mut store = MemoryStore::new();
        let mut handler = PacketCommands;
        let command = Command { code: CommandCode::Ping, args: String::new() };
        let ctx = CommandContext { transport: &mut link, store: &mut store };
        dispatch(Some(&mut handler), &command, ctx).unwrap();
        assert_eq!(link.written(), b"HI");
    }

    #[test]
    fn test_requested_units() {
        let mut store = MemoryStore::new();
        store.put(UnitId::Init, b"i").unwrap();
        store.put(UnitId::Data(0), b"d").unwrap();

        assert_eq!(
            requested_units(" init, 4 6-8", &store).unwrap(),
            vec![UnitId::Init, UnitId::Data(4), UnitId::Data(6), UnitId::Data(7), UnitId::Data(8)]
        );
        assert_eq!(requested_units("", &store).unwrap(), vec![UnitId::Init, UnitId::Data(0)]);
        assert!(requested_units("x", &store).is_err());
        assert!(requested_units("5-2", &store).is_err());
    }
}
