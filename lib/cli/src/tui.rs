//! Terminal rendering of received snapshots.

use anyhow::{Context, Result};
use chrono::Local;
use metrics::metric::{CpuSample, CpuStat, DiskSample, DiskStat, IoSample, LoadSample};
use metrics::{Metric, MetricKind};
use owo_colors::OwoColorize;
use prettytable::{format, row, Cell, Row, Table};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{self, Stdout, Write};

/// Filesystems not worth showing in disk tables.
const PSEUDO_FILESYSTEMS: [&str; 3] = ["tmpfs", "devtmpfs", "squashfs"];

/// Receives one decoded snapshot at a time.
pub trait Renderer {
    fn draw_cpu(&mut self, sample: &CpuSample) -> Result<()>;
    fn draw_load(&mut self, sample: &LoadSample) -> Result<()>;
    fn draw_io(&mut self, sample: &IoSample) -> Result<()>;
    fn draw_disk_usage(&mut self, sample: &DiskSample) -> Result<()>;
    fn draw_disk_inode(&mut self, sample: &DiskSample) -> Result<()>;

    fn render(&mut self, metric: &Metric) -> Result<()> {
        match metric {
            Metric::Cpu(sample) => self.draw_cpu(sample),
            Metric::Load(sample) => self.draw_load(sample),
            Metric::Io(sample) => self.draw_io(sample),
            Metric::DiskUsage(sample) => self.draw_disk_usage(sample),
            Metric::DiskInode(sample) => self.draw_disk_inode(sample),
        }
    }
}

/// Keeps the latest snapshot of every kind and redraws all of them as tables.
pub struct TableRenderer<W: Write = Stdout> {
    out: W,
    latest: BTreeMap<MetricKind, Metric>,
    clear_screen: bool,
}

impl TableRenderer<Stdout> {
    pub fn new() -> Self {
        Self {
            out: io::stdout(),
            latest: BTreeMap::new(),
            clear_screen: true,
        }
    }
}

impl Default for TableRenderer<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> TableRenderer<W> {
    /// Render into `out` without clearing the terminal.
    pub fn with_writer(out: W) -> Self {
        Self {
            out,
            latest: BTreeMap::new(),
            clear_screen: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn update(&mut self, metric: Metric) -> Result<()> {
        self.latest.insert(metric.kind(), metric);
        self.redraw()
    }

    fn redraw(&mut self) -> Result<()> {
        if self.clear_screen {
            write!(self.out, "\x1B[2J\x1B[H")?;
        }
        writeln!(
            self.out,
            "{} {}",
            "hostmon".green().bold(),
            Local::now().format("%Y-%m-%d %H:%M:%S").dimmed()
        )?;

        for (kind, metric) in &self.latest {
            let (title, table) = match metric {
                Metric::Cpu(sample) => ("CPU", cpu_table(sample)),
                Metric::Load(sample) => ("Load average", load_table(sample)),
                Metric::Io(sample) => ("Disk I/O", io_table(sample)),
                Metric::DiskUsage(sample) => ("Disk usage", disk_usage_table(sample)),
                Metric::DiskInode(sample) => ("Disk inodes", disk_inode_table(sample)),
            };
            writeln!(self.out)?;
            writeln!(self.out, "{}", title.cyan().bold())?;
            table
                .print(&mut self.out)
                .with_context(|| format!("Failed to draw {} table", kind))?;
        }

        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Renderer for TableRenderer<W> {
    fn draw_cpu(&mut self, sample: &CpuSample) -> Result<()> {
        self.update(Metric::Cpu(sample.clone()))
    }

    fn draw_load(&mut self, sample: &LoadSample) -> Result<()> {
        self.update(Metric::Load(*sample))
    }

    fn draw_io(&mut self, sample: &IoSample) -> Result<()> {
        self.update(Metric::Io(sample.clone()))
    }

    fn draw_disk_usage(&mut self, sample: &DiskSample) -> Result<()> {
        self.update(Metric::DiskUsage(sample.clone()))
    }

    fn draw_disk_inode(&mut self, sample: &DiskSample) -> Result<()> {
        self.update(Metric::DiskInode(sample.clone()))
    }
}

fn new_table(titles: Row) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    table.set_titles(titles);
    table
}

/// Percentage cell, red above 90% and yellow above 70%.
fn percent_cell(value: f32) -> Cell {
    let cell = Cell::new(&format!("{:.2}%", value));
    if value > 90.0 {
        cell.style_spec("Fr")
    } else if value > 70.0 {
        cell.style_spec("Fy")
    } else {
        cell
    }
}

/// `all` first, then cores in numeric order.
fn cpu_order(a: &CpuStat, b: &CpuStat) -> Ordering {
    let key = |stat: &CpuStat| match stat.cpu.as_str() {
        "all" => (0, 0, String::new()),
        id => match id.parse::<u32>() {
            Ok(n) => (1, n, String::new()),
            Err(_) => (2, 0, id.to_string()),
        },
    };
    key(a).cmp(&key(b))
}

pub fn cpu_table(sample: &CpuSample) -> Table {
    let mut cpus: Vec<&CpuStat> = sample.cpus.iter().collect();
    cpus.sort_by(|a, b| cpu_order(a, b));

    let mut table = new_table(row!["CPU", "%user", "%system", "%idle"]);
    for stat in cpus {
        table.add_row(Row::new(vec![
            Cell::new(&stat.cpu),
            percent_cell(stat.user),
            percent_cell(stat.system),
            Cell::new(&format!("{:.2}%", stat.idle)),
        ]));
    }
    table
}

pub fn load_table(sample: &LoadSample) -> Table {
    let mut table = new_table(row!["1 min", "5 min", "15 min"]);
    table.add_row(row![
        format!("{:.2}", sample.load1),
        format!("{:.2}", sample.load5),
        format!("{:.2}", sample.load15)
    ]);
    table
}

pub fn io_table(sample: &IoSample) -> Table {
    let mut table = new_table(row!["Device", "Read kB/s", "Write kB/s", "%util"]);
    for stat in sample
        .disks
        .iter()
        .filter(|stat| !stat.device.starts_with("loop"))
    {
        table.add_row(Row::new(vec![
            Cell::new(&stat.device),
            Cell::new(&format!("{:.2}", stat.read_kbs)),
            Cell::new(&format!("{:.2}", stat.write_kbs)),
            percent_cell(stat.util),
        ]));
    }
    table
}

fn real_filesystems(sample: &DiskSample) -> impl Iterator<Item = &DiskStat> {
    sample
        .mounts
        .iter()
        .filter(|stat| !PSEUDO_FILESYSTEMS.contains(&stat.fs_type.as_str()))
}

fn used_percent(stat: &DiskStat) -> f32 {
    match stat.total() {
        0 => 0.0,
        total => (stat.used as f64 / total as f64 * 100.0) as f32,
    }
}

pub fn disk_usage_table(sample: &DiskSample) -> Table {
    let mut table = new_table(row!["Filesystem", "Type", "Mounted on", "Size", "Used", "Avail", "Use%"]);
    for stat in real_filesystems(sample) {
        table.add_row(Row::new(vec![
            Cell::new(&stat.device),
            Cell::new(&stat.fs_type),
            Cell::new(&stat.mount),
            Cell::new(&human_bytes(stat.total())),
            Cell::new(&human_bytes(stat.used)),
            Cell::new(&human_bytes(stat.available)),
            percent_cell(used_percent(stat)),
        ]));
    }
    table
}

pub fn disk_inode_table(sample: &DiskSample) -> Table {
    let mut table = new_table(row!["Filesystem", "Type", "Mounted on", "Inodes", "IUsed", "IFree", "IUse%"]);
    for stat in real_filesystems(sample) {
        table.add_row(Row::new(vec![
            Cell::new(&stat.device),
            Cell::new(&stat.fs_type),
            Cell::new(&stat.mount),
            Cell::new(&stat.total().to_string()),
            Cell::new(&stat.used.to_string()),
            Cell::new(&stat.available.to_string()),
            percent_cell(used_percent(stat)),
        ]));
    }
    table
}

/// Binary-prefixed size, e.g. `1.5 KiB`.
pub fn human_bytes(bytes: i64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes.unsigned_abs() < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
