//! Averaging of window contents.
//!
//! Samples are grouped by their identity key (CPU id, device, mount path) and every
//! numeric field is averaged within its group. Groups come out ordered by key.

use crate::metric::{CpuSample, CpuStat, DiskSample, DiskStat, IoSample, IoStat, LoadSample};
use std::collections::BTreeMap;

/// Arithmetic mean, zero for an empty input.
pub fn mean_f32<I>(values: I) -> f32
where
    I: IntoIterator<Item = f32>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0f64, 0usize), |(sum, count), v| (sum + v as f64, count + 1));
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64) as f32
}

/// Integer mean with truncating division, zero for an empty input.
pub fn mean_i64<I>(values: I) -> i64
where
    I: IntoIterator<Item = i64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0i128, 0i128), |(sum, count), v| (sum + v as i128, count + 1));
    if count == 0 {
        return 0;
    }
    (sum / count) as i64
}

pub trait Aggregate: Sized {
    /// Average a set of samples of the same kind into one snapshot.
    fn average<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a;
}

fn group_by<'a, S, T, F>(samples: impl IntoIterator<Item = &'a S>, rows: F) -> BTreeMap<String, Vec<&'a T>>
where
    S: 'a,
    T: 'a,
    F: Fn(&'a S) -> Vec<(&'a str, &'a T)>,
{
    let mut groups: BTreeMap<String, Vec<&'a T>> = BTreeMap::new();
    for sample in samples {
        for (key, row) in rows(sample) {
            groups.entry(key.to_string()).or_default().push(row);
        }
    }
    groups
}

impl Aggregate for CpuSample {
    fn average<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        let groups = group_by(samples, |s: &'a CpuSample| {
            s.cpus.iter().map(|stat| (stat.cpu.as_str(), stat)).collect()
        });

        let cpus = groups
            .into_iter()
            .map(|(cpu, stats)| CpuStat {
                user: mean_f32(stats.iter().map(|s| s.user)),
                system: mean_f32(stats.iter().map(|s| s.system)),
                idle: mean_f32(stats.iter().map(|s| s.idle)),
                cpu,
            })
            .collect();

        CpuSample { cpus }
    }
}

impl Aggregate for LoadSample {
    fn average<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        let samples: Vec<&LoadSample> = samples.into_iter().collect();
        LoadSample {
            load1: mean_f32(samples.iter().map(|s| s.load1)),
            load5: mean_f32(samples.iter().map(|s| s.load5)),
            load15: mean_f32(samples.iter().map(|s| s.load15)),
        }
    }
}

impl Aggregate for IoSample {
    fn average<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        let groups = group_by(samples, |s: &'a IoSample| {
            s.disks.iter().map(|stat| (stat.device.as_str(), stat)).collect()
        });

        let disks = groups
            .into_iter()
            .map(|(device, stats)| IoStat {
                read_kbs: mean_f32(stats.iter().map(|s| s.read_kbs)),
                write_kbs: mean_f32(stats.iter().map(|s| s.write_kbs)),
                util: mean_f32(stats.iter().map(|s| s.util)),
                device,
            })
            .collect();

        IoSample { disks }
    }
}

impl Aggregate for DiskSample {
    fn average<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        let groups = group_by(samples, |s: &'a DiskSample| {
            s.mounts.iter().map(|stat| (stat.mount.as_str(), stat)).collect()
        });

        let mounts = groups
            .into_iter()
            .filter_map(|(mount, stats)| {
                // device and fs type are labels, the first sample seen names the group
                let first = stats.first()?;
                Some(DiskStat {
                    device: first.device.clone(),
                    fs_type: first.fs_type.clone(),
                    used: mean_i64(stats.iter().map(|s| s.used)),
                    available: mean_i64(stats.iter().map(|s| s.available)),
                    mount,
                })
            })
            .collect();

        DiskSample { mounts }
    }
}
