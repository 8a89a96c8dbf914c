//! Output parsers
//!
//! Total functions over the text printed by docker, ps, top, free and df.
//! Malformed input degrades to "no update" (`None` or a skipped line);
//! nothing here returns an error.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use regex::Regex;

/// One row of `docker ps -a --format {{.Names}}|{{.Status}}|{{.CreatedAt}}|{{.Image}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub name: String,
    pub running: bool,
    pub created_at: String,
    pub image: String,
}

/// One row of `docker stats --no-stream --format {{.Name}}|{{.CPUPerc}}|{{.MemUsage}}`
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStat {
    pub name: String,
    pub cpu_percent: f64,
    pub memory_mib: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySummary {
    pub total_gb: f64,
    pub used_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskSummary {
    pub total_gb: f64,
    pub used_gb: f64,
    pub usage_percent: f64,
}

pub fn parse_container_listing(output: &str) -> Vec<ContainerEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 3 {
                log::debug!("skipping container listing line: {:?}", line);
                return None;
            }
            Some(ContainerEntry {
                name: fields[0].trim().to_string(),
                running: fields[1].to_lowercase().contains("up"),
                created_at: fields[2].trim().to_string(),
                image: fields.get(3).map(|s| s.trim().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

pub fn parse_resource_stats(output: &str) -> Vec<ResourceStat> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 3 {
                log::debug!("skipping stats line: {:?}", line);
                return None;
            }
            Some(ResourceStat {
                name: fields[0].trim().to_string(),
                cpu_percent: number_or_zero(fields[1].trim().trim_end_matches('%')),
                memory_mib: parse_memory_used(fields[2]),
            })
        })
        .collect()
}

/// Used side of `123.4MiB / 2GiB`, normalised to MiB
fn parse_memory_used(field: &str) -> f64 {
    let used = field.split(" / ").next().unwrap_or("").trim();
    if let Some(gib) = used.strip_suffix("GiB") {
        number_or_zero(gib) * 1024.0
    } else if let Some(mib) = used.strip_suffix("MiB") {
        number_or_zero(mib)
    } else if let Some(kib) = used.strip_suffix("KiB") {
        number_or_zero(kib) / 1024.0
    } else {
        number_or_zero(used)
    }
}

fn number_or_zero(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

fn cpu_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+\.\d+)\s*us").ok()).as_ref()
}

/// User-time percentage from the `%Cpu(s):` line of `top -bn1`
pub fn parse_cpu_line(output: &str) -> Option<f64> {
    let line = output.lines().find(|line| line.contains("%Cpu(s):"))?;
    let captures = cpu_regex()?.captures(line)?;
    captures.get(1)?.as_str().parse().ok()
}

/// The `Mem:` row of `free -m`
pub fn parse_memory_summary(output: &str) -> Option<MemorySummary> {
    let line = output.lines().find(|line| line.starts_with("Mem:"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return None;
    }
    let total: f64 = fields[1].parse().ok()?;
    let used: f64 = fields[2].parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(MemorySummary {
        total_gb: total / 1024.0,
        used_gb: used / 1024.0,
        usage_percent: used / total * 100.0,
    })
}

/// Second line of `df -h /`: size, used and use% columns
pub fn parse_disk_summary(output: &str) -> Option<DiskSummary> {
    let line = output.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }
    Some(DiskSummary {
        total_gb: size_in_gb(fields[1]),
        used_gb: size_in_gb(fields[2]),
        usage_percent: number_or_zero(&fields[4].replace('%', "")),
    })
}

/// A `df -h` size such as `512M` or `1.8T`; a bare number is bytes
fn size_in_gb(field: &str) -> f64 {
    let field = field.trim();
    let Some(unit) = field.chars().last().filter(|c| c.is_ascii_alphabetic()) else {
        return number_or_zero(field) / GIB;
    };
    let value = number_or_zero(&field[..field.len() - 1]);
    match unit.to_ascii_uppercase() {
        'K' => value / (1024.0 * 1024.0),
        'M' => value / 1024.0,
        'G' => value,
        'T' => value * 1024.0,
        'P' => value * 1024.0 * 1024.0,
        _ => 0.0,
    }
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Native service presence: substring match against the process table
pub fn process_present(listing: &str, name: &str) -> bool {
    !name.is_empty() && listing.contains(name)
}

pub fn format_uptime(created_at: &str, now: DateTime<Utc>) -> String {
    let Some(created) = parse_created_at(created_at) else {
        return "Unknown".to_string();
    };
    let seconds = (now - created).num_seconds().max(0);
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Docker prints `2024-01-15 10:30:00 +0000 UTC`
fn parse_created_at(created_at: &str) -> Option<DateTime<Utc>> {
    let tokens: Vec<&str> = created_at.split_whitespace().collect();
    if tokens.len() >= 3 {
        let stamp = tokens[..3].join(" ");
        if let Ok(parsed) = DateTime::<FixedOffset>::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S %z") {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    let date = NaiveDate::parse_from_str(tokens.first()?, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}
