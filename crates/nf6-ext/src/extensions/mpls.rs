//! The MPLS target: attach an outgoing NHLFE key to matching packets.

use nf6_abi::Entry;

use crate::{ArgKind, ExtError, OptSpec, Result, TargetExt, string_to_number};

/// Payload: the 32-bit NHLFE key, little-endian.
pub const MPLS_SIZE: usize = 4;

const OPT_NHLFE: u32 = 1;

const OPTS: &[OptSpec] = &[OptSpec::new("nhlfe", ArgKind::Required, OPT_NHLFE)];

/// `-j MPLS --nhlfe <key>`.
pub struct MplsTarget;

impl MplsTarget {
    /// Read the key back out of an assembled payload.
    #[must_use]
    pub fn key(data: &[u8]) -> u32 {
        u32::from_le_bytes([data[0], data[1], data[2], data[3]])
    }
}

impl TargetExt for MplsTarget {
    fn name(&self) -> &'static str {
        "MPLS"
    }

    fn size(&self) -> usize {
        MPLS_SIZE
    }

    fn options(&self) -> &'static [OptSpec] {
        OPTS
    }

    fn help(&self) -> &'static str {
        "MPLS target options:\n\
         \x20 --nhlfe key\t\t      Set an outgoing MPLS NHLFE\n"
    }

    fn parse(
        &self,
        code: u32,
        arg: Option<&str>,
        invert: bool,
        flags: &mut u32,
        _entry: &mut Entry,
        data: &mut [u8],
    ) -> Result<bool> {
        if code != OPT_NHLFE {
            return Ok(false);
        }
        if invert {
            return Err(ExtError::Parameter(
                "MPLS target: unexpected `!' with --nhlfe".to_string(),
            ));
        }
        if *flags != 0 {
            return Err(ExtError::Parameter(
                "MPLS target: can't specify --nhlfe twice".to_string(),
            ));
        }
        let arg = arg.ok_or_else(|| {
            ExtError::Parameter("MPLS target: --nhlfe requires a key".to_string())
        })?;
        let key = string_to_number(arg, 0, u64::from(u32::MAX))
            .ok_or_else(|| ExtError::Parameter(format!("Bad MPLS key `{arg}'")))?;
        data[..4].copy_from_slice(&(key as u32).to_le_bytes());
        *flags = 1;
        Ok(true)
    }

    fn final_check(&self, flags: u32) -> Result<()> {
        if flags == 0 {
            return Err(ExtError::Parameter(
                "MPLS target: parameter --nhlfe is required".to_string(),
            ));
        }
        Ok(())
    }

    fn print(&self, _entry: &Entry, data: &[u8], _numeric: bool) -> String {
        format!("nhlfe 0x{:x} ", Self::key(data))
    }

    fn save(&self, _entry: &Entry, data: &[u8]) -> String {
        format!("--nhlfe 0x{:x} ", Self::key(data))
    }
}
