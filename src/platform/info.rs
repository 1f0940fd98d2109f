use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// One sub-image of a packaged image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub size_bytes: u64,
}

fn dism_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^Index : (\d+)\s+Name : (.+)\s+Description : (.+)\s+Size : ([\d,.]+) bytes",
        )
        .ok()
    })
    .as_ref()
}

impl ImageInfo {
    /// Parse `dism /Get-ImageInfo` output.
    pub fn parse_dism(output: &str) -> Vec<ImageInfo> {
        let Some(re) = dism_regex() else {
            return Vec::new();
        };
        re.captures_iter(output)
            .filter_map(|c| {
                Some(ImageInfo {
                    index: c[1].parse().ok()?,
                    name: c[2].trim().to_string(),
                    description: c[3].trim().to_string(),
                    size_bytes: digits(&c[4])?,
                })
            })
            .collect()
    }

    /// Parse `wimlib-imagex info` output.
    pub fn parse_wimlib(output: &str) -> Vec<ImageInfo> {
        let mut images = Vec::new();
        let mut current: Option<ImageInfo> = None;

        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Index" => {
                    images.extend(current.take());
                    current = value.parse().ok().map(|index| ImageInfo {
                        index,
                        name: String::new(),
                        description: String::new(),
                        size_bytes: 0,
                    });
                }
                "Name" => {
                    if let Some(info) = current.as_mut() {
                        info.name = value.to_string();
                    }
                }
                "Description" => {
                    if let Some(info) = current.as_mut() {
                        info.description = value.to_string();
                    }
                }
                "Total Bytes" => {
                    if let Some(info) = current.as_mut() {
                        info.size_bytes = digits(value).unwrap_or(0);
                    }
                }
                _ => {}
            }
        }
        images.extend(current);
        images
    }
}

/// Parse a byte count that may carry thousands separators.
fn digits(s: &str) -> Option<u64> {
    let plain: String = s.chars().filter(char::is_ascii_digit).collect();
    plain.parse().ok()
}
