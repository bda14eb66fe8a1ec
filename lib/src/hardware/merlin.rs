//! Client for the external Merlin pixel-detector server that records 4D
//! datasets.
//!
//! The server speaks a plain TCP command protocol: every message is
//! `MPX,<10-digit length>,<verb>,<name>[,<value>]`, with the length counting
//! everything after the second comma. The core only configures an
//! acquisition and arms the recorder; the raw 4D data never passes through
//! this process.

use std::fmt::Display;
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};

/// Counter depth of the Merlin chips, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    /// Binary counting; fastest frame rate.
    One,
    /// Six-bit counting.
    Six,
    /// Twelve-bit counting; slowest frame rate.
    Twelve,
}

impl BitDepth {
    /// The numeric depth sent to the server and stored in metadata.
    pub fn bits(self) -> u32 {
        match self {
            BitDepth::One => 1,
            BitDepth::Six => 6,
            BitDepth::Twelve => 12,
        }
    }

    /// Parses a configured depth.
    pub fn from_bits(bits: u32) -> Result<BitDepth> {
        match bits {
            1 => Ok(BitDepth::One),
            6 => Ok(BitDepth::Six),
            12 => Ok(BitDepth::Twelve),
            other => Err(Error::validation(
                "bit depth",
                format!("expected 1, 6 or 12, got {other}"),
            )),
        }
    }

    /// The smallest dwell the chips sustain at this depth, in microseconds.
    pub fn minimum_dwell_usec(self) -> f64 {
        match self {
            BitDepth::One => 100.0,
            BitDepth::Six => 600.0,
            BitDepth::Twelve => 1000.0,
        }
    }
}

/// Parameters of one 4D acquisition, also written into the HDF5 metadata
/// group of the region file.
#[derive(Debug, Clone)]
pub struct MerlinAcquisition {
    /// Per-frame dwell, in microseconds.
    pub dwell_usec: f64,
    /// Scan size in pixels; the acquisition records `scan_px`² frames.
    pub scan_px: u32,
    /// Counter depth.
    pub bit_depth: BitDepth,
    /// Directory the server saves into.
    pub directory: PathBuf,
    /// Stem of the server-side data file name.
    pub stem: String,
}

impl MerlinAcquisition {
    /// The total number of frames the scan produces.
    pub fn frames(&self) -> u64 {
        self.scan_px as u64 * self.scan_px as u64
    }
}

/// A camera server capable of recording a 4D dataset alongside a scan.
pub trait FourDCamera: Send {
    /// Pushes the acquisition parameters to the server.
    fn configure(&mut self, acquisition: &MerlinAcquisition) -> Result<()>;
    /// Arms the recorder; the next scan trigger starts the dataset.
    fn start_record(&mut self) -> Result<()>;
}

/// Formats one protocol frame.
pub(crate) fn frame(verb: &str, body: &str) -> String {
    let payload = format!("{verb},{body}");
    format!("MPX,{:010},{}", payload.len(), payload)
}

/// A live TCP connection to a Merlin server.
pub struct MerlinConnection {
    stream: TcpStream,
    host: String,
}

impl MerlinConnection {
    /// The command port of the Merlin software.
    pub const COMMAND_PORT: u16 = 6341;

    /// Connects to the command port of the server at `host`.
    pub fn connect(host: &str, timeout: Duration) -> Result<MerlinConnection> {
        let address = format!("{host}:{}", MerlinConnection::COMMAND_PORT);
        let resolved = address
            .parse()
            .map_err(|err| Error::hardware("merlin", format!("bad address {address}: {err}")))?;
        let stream = TcpStream::connect_timeout(&resolved, timeout)
            .map_err(|err| Error::hardware("merlin", format!("connect to {address}: {err}")))?;
        Ok(MerlinConnection {
            stream,
            host: host.to_owned(),
        })
    }

    fn send(&mut self, verb: &str, body: &str) -> Result<()> {
        let message = frame(verb, body);
        debug!("merlin <- {message}");
        self.stream
            .write_all(message.as_bytes())
            .map_err(|err| Error::hardware("merlin", format!("send to {}: {err}", self.host)))
    }

    /// Sets one named value on the server.
    pub fn set_value(&mut self, key: &str, value: impl Display) -> Result<()> {
        self.send("SET", &format!("{key},{value}"))
    }

    /// Issues one named command.
    pub fn command(&mut self, name: &str) -> Result<()> {
        self.send("CMD", name)
    }
}

impl FourDCamera for MerlinConnection {
    fn configure(&mut self, acquisition: &MerlinAcquisition) -> Result<()> {
        self.set_value("NUMFRAMESTOACQUIRE", acquisition.frames())?;
        self.set_value("COUNTERDEPTH", acquisition.bit_depth.bits())?;
        self.set_value("CONTINUOUSRW", 1)?;
        // The server takes milliseconds and keeps half the dwell for readout.
        self.set_value("ACQUISITIONTIME", acquisition.dwell_usec / 2e3)?;
        self.set_value("FILEDIRECTORY", acquisition.directory.display())?;
        self.set_value("FILENAME", format!("{}_data", acquisition.stem))?;
        self.set_value("FILEENABLE", 1)?;
        self.set_value("TRIGGERSTART", 1)?;
        self.set_value("TRIGGERSTOP", 1)?;
        self.set_value("SAVEALLTOFILE", 1)?;
        self.set_value("USETIMESTAMPING", 0)?;
        self.set_value("SCANX", acquisition.scan_px)?;
        self.set_value("SCANY", acquisition.scan_px)?;
        self.set_value("SCANTRIGGERMODE", 0)?;
        self.set_value("SCANDETECTOR1ENABLE", 1)?;
        self.set_value("SCANDETECTOR1TYPE", 0)?;
        self.set_value("SCANDETECTOR1CENTREX", 255)?;
        self.set_value("SCANDETECTOR1CENTREY", 255)?;
        self.set_value("SCANDETECTOR1INNERRADIUS", 50)?;
        self.set_value("SCANDETECTOR1OUTERRADIUS", 150)?;
        Ok(())
    }

    fn start_record(&mut self) -> Result<()> {
        self.command("SCANSTARTRECORD")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_their_length() {
        let message = frame("SET", "COUNTERDEPTH,12");
        assert_eq!(message, "MPX,0000000019,SET,COUNTERDEPTH,12");
        let command = frame("CMD", "SCANSTARTRECORD");
        assert_eq!(command, "MPX,0000000019,CMD,SCANSTARTRECORD");
    }

    #[test]
    fn depth_round_trips() {
        for bits in [1, 6, 12] {
            assert_eq!(BitDepth::from_bits(bits).unwrap().bits(), bits);
        }
        assert!(BitDepth::from_bits(8).is_err());
    }

    #[test]
    fn depth_bounds_the_dwell() {
        assert_eq!(BitDepth::One.minimum_dwell_usec(), 100.0);
        assert_eq!(BitDepth::Six.minimum_dwell_usec(), 600.0);
        assert_eq!(BitDepth::Twelve.minimum_dwell_usec(), 1000.0);
    }

    #[test]
    fn acquisitions_count_their_frames() {
        let acquisition = MerlinAcquisition {
            dwell_usec: 1000.0,
            scan_px: 256,
            bit_depth: BitDepth::Twelve,
            directory: PathBuf::from("/data"),
            stem: "20240101_000000".into(),
        };
        assert_eq!(acquisition.frames(), 65536);
    }
}
