use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::utils::errors::DownloadError;

/// Bytes read from the head of a file for signature detection
const HEADER_LEN: usize = 512;
const TS_PACKET_LEN: usize = 188;

/// Container families recognised from the file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// ISO base media (mp4, mov, 3gp): `ftyp` at offset 4
    IsoMedia,
    /// `RIFF....AVI `
    Avi,
    /// EBML header (mkv, webm)
    Matroska,
    Flv,
    MpegTs,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub actual_size: u64,
    pub expected_size: u64,
    pub format: ContainerFormat,
}

impl ValidationReport {
    /// Right size, unrecognised signature. Accepted; the player gets the final say.
    pub fn is_provisional(&self) -> bool {
        self.format == ContainerFormat::Unknown
    }
}

pub fn detect_container(header: &[u8]) -> ContainerFormat {
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return ContainerFormat::IsoMedia;
    }
    if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"AVI " {
        return ContainerFormat::Avi;
    }
    if header.len() >= 4 && header[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return ContainerFormat::Matroska;
    }
    if header.len() >= 3 && &header[0..3] == b"FLV" {
        return ContainerFormat::Flv;
    }
    if header.len() > TS_PACKET_LEN && header[0] == 0x47 && header[TS_PACKET_LEN] == 0x47 {
        return ContainerFormat::MpegTs;
    }
    ContainerFormat::Unknown
}

/// `|actual - expected| <= tolerance% of expected`
pub fn size_within_tolerance(actual: u64, expected: u64, tolerance_percent: f64) -> bool {
    let allowed = expected as f64 * tolerance_percent / 100.0;
    (actual as f64 - expected as f64).abs() <= allowed
}

/// Check a downloaded file against the size the backend announced and a known
/// container signature.
pub async fn validate_file(
    path: &Path,
    expected_size: u64,
    tolerance_percent: f64,
) -> Result<ValidationReport, DownloadError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| DownloadError::Integrity(format!("cannot stat {:?}: {}", path, e)))?;
    let actual_size = metadata.len();

    if actual_size == 0 {
        return Err(DownloadError::Integrity(format!("{:?} is empty", path)));
    }

    if !size_within_tolerance(actual_size, expected_size, tolerance_percent) {
        return Err(DownloadError::Integrity(format!(
            "size mismatch for {:?}: expected {} bytes, found {}",
            path, expected_size, actual_size
        )));
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DownloadError::Integrity(format!("cannot open {:?}: {}", path, e)))?;
    let mut header = vec![0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let read = file
            .read(&mut header[filled..])
            .await
            .map_err(|e| DownloadError::Integrity(format!("cannot read {:?}: {}", path, e)))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    header.truncate(filled);

    let format = detect_container(&header);
    if format == ContainerFormat::Unknown {
        warn!(
            "Unrecognised container signature in {:?}; accepting provisionally",
            path
        );
    } else {
        debug!("{:?} validated as {:?} ({} bytes)", path, format, actual_size);
    }

    Ok(ValidationReport {
        actual_size,
        expected_size,
        format,
    })
}
