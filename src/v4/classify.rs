//! Client firmware classification (RFC 4578 option 93)

use std::fmt;

use dhcproto::v4;

use crate::error::ClassifyError;
use crate::v4::extensions::BootMessageExtV4;

/// User class sent by clients already running the iPXE chain-loader
const IPXE_USER_CLASS: &[u8] = b"iPXE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Ia32,
    X64,
}

/// Firmware interface of the booting client. Selects the boot chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    /// Legacy x86 PC BIOS
    Bios,
    Efi32,
    Efi64,
    /// EFI byte code
    EfiBc,
    /// BIOS client that is already running iPXE
    BiosIpxe,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Architecture::Ia32 => "ia32",
            Architecture::X64 => "x64",
        })
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Firmware::Bios => "bios",
            Firmware::Efi32 => "efi32",
            Firmware::Efi64 => "efi64",
            Firmware::EfiBc => "efibc",
            Firmware::BiosIpxe => "bios-ipxe",
        })
    }
}

/// Determine the architecture and firmware of a PXE client.
///
/// Option 93 is required. The user class (option 77) only refines a plain
/// BIOS client into [`Firmware::BiosIpxe`].
pub fn classify(msg: &v4::Message) -> Result<(Architecture, Firmware), ClassifyError> {
    let code = msg
        .client_arch()
        .ok_or(ClassifyError::MissingArchitecture)?;

    let (arch, firmware) = match code {
        0 => (Architecture::Ia32, Firmware::Bios),
        6 => (Architecture::Ia32, Firmware::Efi32),
        7 => (Architecture::X64, Firmware::Efi64),
        9 => (Architecture::X64, Firmware::EfiBc),
        other => return Err(ClassifyError::UnsupportedFirmware(other)),
    };

    if firmware == Firmware::Bios && msg.user_class() == Some(IPXE_USER_CLASS) {
        return Ok((arch, Firmware::BiosIpxe));
    }

    Ok((arch, firmware))
}
