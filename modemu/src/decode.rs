use std::fmt::Write;

/// Controls how request and response frames are logged at the INFO level
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DecodeLevel {
    /// Log nothing
    #[default]
    Nothing,
    /// Log the unit id, function code and length of each frame
    Header,
    /// Log the header and the frame bytes as hexadecimal
    Payload,
}

impl DecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        self.header_enabled()
    }

    pub(crate) fn header_enabled(&self) -> bool {
        match self {
            DecodeLevel::Nothing => false,
            DecodeLevel::Header => true,
            DecodeLevel::Payload => true,
        }
    }

    pub(crate) fn payload_enabled(&self) -> bool {
        match self {
            DecodeLevel::Nothing => false,
            DecodeLevel::Header => false,
            DecodeLevel::Payload => true,
        }
    }
}

/// Displays a raw frame (`[unit, fc, data...]`) according to a [`DecodeLevel`]
pub(crate) struct FrameDisplay<'a> {
    level: DecodeLevel,
    frame: &'a [u8],
}

impl<'a> FrameDisplay<'a> {
    pub(crate) fn new(level: DecodeLevel, frame: &'a [u8]) -> Self {
        FrameDisplay { level, frame }
    }
}

impl std::fmt::Display for FrameDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.frame {
            [unit, fc, ..] => write!(f, "unit: {unit:#04X} fc: {fc:#04X}")?,
            [unit] => write!(f, "unit: {unit:#04X}")?,
            [] => {}
        }
        write!(f, " ({} bytes)", self.frame.len())?;
        if self.level.payload_enabled() {
            format_bytes(f, self.frame)?;
        }
        Ok(())
    }
}

/// Space separated upper-case hex, as printed by the command line tools
pub struct HexDisplay<'a>(pub &'a [u8]);

impl std::fmt::Display for HexDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut first = true;
        for byte in self.0 {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        write!(f, "{}", HexDisplay(chunk))?;
    }
    Ok(())
}
