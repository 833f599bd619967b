//! NVIDIA GPU enumeration and the legacy-GPU advisory table.
//!
//! GPUs are found with `lspci -n`; each NVIDIA device id is checked against
//! the table of GPUs that only a legacy driver branch supports.

use lazy_static::lazy_static;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::process::Command;

// Vendor 10de is NVIDIA.
static LSPCI_NVIDIA_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b10de:([0-9a-f]{4})\b").expect("Invalid lspci regex")
});

/// Driver branch naming, newest first.
const LEGACY_BRANCHES: [(u8, &str); 3] = [(3, "173.14.xx"), (2, "96.43.xx"), (1, "71.86.xx")];

/// (PCI device id, legacy branch, marketing name)
const LEGACY_GPUS: &[(u16, u8, &str)] = &[
    (0x0020, 1, "RIVA TNT"),
    (0x0028, 1, "RIVA TNT2/TNT2 Pro"),
    (0x0029, 1, "RIVA TNT2 Ultra"),
    (0x002C, 1, "Vanta/Vanta LT"),
    (0x002D, 1, "RIVA TNT2 Model 64/Model 64 Pro"),
    (0x00A0, 1, "Aladdin TNT2"),
    (0x00FA, 3, "GeForce PCX 5750"),
    (0x00FB, 3, "GeForce PCX 5900"),
    (0x00FC, 3, "Quadro FX 330"),
    (0x00FC, 3, "GeForce PCX 5300"),
    (0x00FD, 3, "Quadro FX 330"),
    (0x00FD, 3, "Quadro NVS 280 PCI-E"),
    (0x00FE, 3, "Quadro FX 1300"),
    (0x0100, 1, "GeForce 256"),
    (0x0101, 1, "GeForce DDR"),
    (0x0103, 1, "Quadro"),
    (0x0110, 2, "GeForce2 MX/MX 400"),
    (0x0111, 2, "GeForce2 MX 100/200"),
    (0x0112, 2, "GeForce2 Go"),
    (0x0113, 2, "Quadro2 MXR/EX/Go"),
    (0x0150, 1, "GeForce2 GTS/GeForce2 Pro"),
    (0x0151, 1, "GeForce2 Ti"),
    (0x0152, 1, "GeForce2 Ultra"),
    (0x0153, 1, "Quadro2 Pro"),
    (0x0170, 2, "GeForce4 MX 460"),
    (0x0171, 2, "GeForce4 MX 440"),
    (0x0172, 2, "GeForce4 MX 420"),
    (0x0173, 2, "GeForce4 MX 440-SE"),
    (0x0174, 2, "GeForce4 440 Go"),
    (0x0175, 2, "GeForce4 420 Go"),
    (0x0176, 2, "GeForce4 420 Go 32M"),
    (0x0177, 2, "GeForce4 460 Go"),
    (0x0178, 2, "Quadro4 550 XGL"),
    (0x0179, 2, "GeForce4 440 Go 64M"),
    (0x017A, 2, "Quadro NVS 400"),
    (0x017C, 2, "Quadro4 500 GoGL"),
    (0x017D, 2, "GeForce4 410 Go 16M"),
    (0x0181, 2, "GeForce4 MX 440 with AGP8X"),
    (0x0182, 2, "GeForce4 MX 440SE with AGP8X"),
    (0x0183, 2, "GeForce4 MX 420 with AGP8X"),
    (0x0185, 2, "GeForce4 MX 4000"),
    (0x0188, 2, "Quadro4 580 XGL"),
    (0x018A, 2, "Quadro NVS 280 SD"),
    (0x018B, 2, "Quadro4 380 XGL"),
    (0x018C, 2, "Quadro NVS 50 PCI"),
    (0x01A0, 2, "GeForce2 Integrated GPU"),
    (0x01F0, 2, "GeForce4 MX Integrated GPU"),
    (0x0200, 2, "GeForce3"),
    (0x0201, 2, "GeForce3 Ti 200"),
    (0x0202, 2, "GeForce3 Ti 500"),
    (0x0203, 2, "Quadro DCC"),
    (0x0250, 2, "GeForce4 Ti 4600"),
    (0x0251, 2, "GeForce4 Ti 4400"),
    (0x0253, 2, "GeForce4 Ti 4200"),
    (0x0258, 2, "Quadro4 900 XGL"),
    (0x0259, 2, "Quadro4 750 XGL"),
    (0x025B, 2, "Quadro4 700 XGL"),
    (0x0280, 2, "GeForce4 Ti 4800"),
    (0x0281, 2, "GeForce4 Ti 4200 with AGP8X"),
    (0x0282, 2, "GeForce4 Ti 4800 SE"),
    (0x0286, 2, "GeForce4 4200 Go"),
    (0x0288, 2, "Quadro4 980 XGL"),
    (0x0289, 2, "Quadro4 780 XGL"),
    (0x028C, 2, "Quadro4 700 GoGL"),
    (0x0301, 3, "GeForce FX 5800 Ultra"),
    (0x0302, 3, "GeForce FX 5800"),
    (0x0308, 3, "Quadro FX 2000"),
    (0x0309, 3, "Quadro FX 1000"),
    (0x0311, 3, "GeForce FX 5600 Ultra"),
    (0x0312, 3, "GeForce FX 5600"),
    (0x0314, 3, "GeForce FX 5600XT"),
    (0x031A, 3, "GeForce FX Go5600"),
    (0x031B, 3, "GeForce FX Go5650"),
    (0x031C, 3, "Quadro FX Go700"),
    (0x0320, 3, "GeForce FX 5200"),
    (0x0321, 3, "GeForce FX 5200 Ultra"),
    (0x0322, 3, "GeForce FX 5200"),
    (0x0323, 3, "GeForce FX 5200LE"),
    (0x0324, 3, "GeForce FX Go5200"),
    (0x0325, 3, "GeForce FX Go5250"),
    (0x0326, 3, "GeForce FX 5500"),
    (0x0327, 3, "GeForce FX 5100"),
    (0x0328, 3, "GeForce FX Go5200 32M/64M"),
    (0x032A, 3, "Quadro NVS 55/280 PCI"),
    (0x032B, 3, "Quadro FX 500/FX 600"),
    (0x032C, 3, "GeForce FX Go53xx"),
    (0x032D, 3, "GeForce FX Go5100"),
    (0x0330, 3, "GeForce FX 5900 Ultra"),
    (0x0331, 3, "GeForce FX 5900"),
    (0x0332, 3, "GeForce FX 5900XT"),
    (0x0333, 3, "GeForce FX 5950 Ultra"),
    (0x0334, 3, "GeForce FX 5900ZT"),
    (0x0338, 3, "Quadro FX 3000"),
    (0x033F, 3, "Quadro FX 700"),
    (0x0341, 3, "GeForce FX 5700 Ultra"),
    (0x0342, 3, "GeForce FX 5700"),
    (0x0343, 3, "GeForce FX 5700LE"),
    (0x0344, 3, "GeForce FX 5700VE"),
    (0x0347, 3, "GeForce FX Go5700"),
    (0x0348, 3, "GeForce FX Go5700"),
    (0x034C, 3, "Quadro FX Go1000"),
    (0x034E, 3, "Quadro FX 1100"),
];

lazy_static! {
    static ref LEGACY_BY_ID: HashMap<u16, (u8, &'static str)> = LEGACY_GPUS
        .iter()
        .map(|(id, branch, name)| (*id, (*branch, *name)))
        .collect();
}

/// A GPU only supported by a legacy driver branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyGpu {
    pub device_id: u16,
    pub name: &'static str,
    pub branch: &'static str,
}

/// Look up `device_id` in the legacy table.
pub fn legacy_gpu(device_id: u16) -> Option<LegacyGpu> {
    let (branch, name) = LEGACY_BY_ID.get(&device_id)?;
    let branch = LEGACY_BRANCHES
        .iter()
        .find(|(b, _)| b == branch)
        .map(|(_, s)| *s)
        .unwrap_or("legacy");
    Some(LegacyGpu {
        device_id,
        name,
        branch,
    })
}

/// Extract NVIDIA device ids from `lspci -n` output.
pub fn parse_lspci_ids(output: &str) -> Vec<u16> {
    output
        .lines()
        .filter_map(|line| LSPCI_NVIDIA_REGEX.captures(line))
        .filter_map(|caps| u16::from_str_radix(&caps[1], 16).ok())
        .collect()
}

/// Device ids of every NVIDIA PCI device on this machine.
pub fn detect_nvidia_device_ids() -> Vec<u16> {
    match Command::new("lspci").arg("-n").output() {
        Ok(output) if output.status.success() => {
            parse_lspci_ids(&String::from_utf8_lossy(&output.stdout))
        }
        _ => {
            log::debug!("[GPU] lspci unavailable; GPU enumeration skipped");
            Vec::new()
        }
    }
}

/// Advisory warnings for the GPUs found.
///
/// One warning per legacy GPU, plus one when no supported GPU remains.
pub fn advisory_warnings(device_ids: &[u16], driver_version: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut supported = 0usize;

    for id in device_ids {
        match legacy_gpu(*id) {
            Some(gpu) => warnings.push(format!(
                "The NVIDIA {} GPU installed in this system is supported through the \
                 NVIDIA {} legacy Linux graphics drivers. Please visit \
                 http://www.nvidia.com/object/unix.html for more information. The {} \
                 NVIDIA Linux graphics driver will ignore this GPU.",
                gpu.name, gpu.branch, driver_version
            )),
            None => supported += 1,
        }
    }

    if supported == 0 {
        warnings.push(format!(
            "You do not appear to have an NVIDIA GPU supported by the {} NVIDIA Linux \
             graphics driver installed in this system. For further details, please see \
             the appendix SUPPORTED NVIDIA GRAPHICS CHIPS in the README available on \
             the Linux driver download page at www.nvidia.com.",
            driver_version
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_lookup() {
        let tnt = legacy_gpu(0x0020).unwrap();
        assert_eq!(tnt.name, "RIVA TNT");
        assert_eq!(tnt.branch, "71.86.xx");
        assert!(legacy_gpu(0x2204).is_none());
    }

    #[test]
    fn test_parse_lspci_ids() {
        let output = "00:02.0 0300: 8086:3e92\n\
                      01:00.0 0300: 10de:2204 (rev a1)\n\
                      02:00.0 0300: 10DE:0020\n";
        assert_eq!(parse_lspci_ids(output), vec![0x2204, 0x0020]);
    }

    #[test]
    fn test_warnings_for_legacy_only_system() {
        let warnings = advisory_warnings(&[0x0020], "1.0-9631");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("RIVA TNT"));
        assert!(warnings[1].contains("do not appear"));
    }

    #[test]
    fn test_no_warnings_for_supported_gpu() {
        assert!(advisory_warnings(&[0x2204], "1.0").is_empty());
        assert_eq!(advisory_warnings(&[], "1.0").len(), 1);
    }
}
