// Metric channels carried by the live stream
//
// Every sample carries one value slot per channel. Slots are never omitted:
// a metric the server did not report is `None`, which keeps every history
// series the same length as the timestamp series.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Named metric value stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    Cpu,
    Memory,
    NetworkUp,
    NetworkDown,
    DiskRead,
    DiskWrite,
    Ipc,
    L1dMissRate,
    LlcMissRate,
    BranchMissRate,
    DtlbMissRate,
    PageIn,
    PageOut,
    SwapIn,
    SwapOut,
}

/// Number of channels in a sample
pub const CHANNEL_COUNT: usize = 15;

impl Channel {
    /// All channels, in slot order
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Cpu,
        Channel::Memory,
        Channel::NetworkUp,
        Channel::NetworkDown,
        Channel::DiskRead,
        Channel::DiskWrite,
        Channel::Ipc,
        Channel::L1dMissRate,
        Channel::LlcMissRate,
        Channel::BranchMissRate,
        Channel::DtlbMissRate,
        Channel::PageIn,
        Channel::PageOut,
        Channel::SwapIn,
        Channel::SwapOut,
    ];

    /// Slot index of this channel
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::NetworkUp => "networkUp",
            Self::NetworkDown => "networkDown",
            Self::DiskRead => "diskRead",
            Self::DiskWrite => "diskWrite",
            Self::Ipc => "ipc",
            Self::L1dMissRate => "l1dMissRate",
            Self::LlcMissRate => "llcMissRate",
            Self::BranchMissRate => "branchMissRate",
            Self::DtlbMissRate => "dtlbMissRate",
            Self::PageIn => "pageIn",
            Self::PageOut => "pageOut",
            Self::SwapIn => "swapIn",
            Self::SwapOut => "swapOut",
        }
    }

    /// JSON pointer of the raw value inside a frame's `data` object
    pub fn source_pointer(self) -> &'static str {
        match self {
            Self::Cpu => "/cpu/usage_percent",
            Self::Memory => "/memory/usage_percent",
            Self::NetworkUp => "/network/bytes_sent_per_sec",
            Self::NetworkDown => "/network/bytes_recv_per_sec",
            Self::DiskRead => "/disk/io/read_bytes_per_sec",
            Self::DiskWrite => "/disk/io/write_bytes_per_sec",
            Self::Ipc => "/perf_events/ipc",
            Self::L1dMissRate => "/perf_events/l1d_miss_rate",
            Self::LlcMissRate => "/perf_events/llc_miss_rate",
            Self::BranchMissRate => "/perf_events/branch_miss_rate",
            Self::DtlbMissRate => "/perf_events/dtlb_miss_rate",
            Self::PageIn => "/memory_bandwidth/pgpgin_per_sec",
            Self::PageOut => "/memory_bandwidth/pgpgout_per_sec",
            Self::SwapIn => "/memory_bandwidth/pswpin_per_sec",
            Self::SwapOut => "/memory_bandwidth/pswpout_per_sec",
        }
    }

    /// Factor applied at decode time. Miss rates arrive as fractions and are
    /// charted as percentages.
    pub fn scale(self) -> f64 {
        if self.is_miss_rate() {
            100.0
        } else {
            1.0
        }
    }

    pub fn is_miss_rate(self) -> bool {
        matches!(
            self,
            Self::L1dMissRate | Self::LlcMissRate | Self::BranchMissRate | Self::DtlbMissRate
        )
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown channel: {}", s))
    }
}

/// One value slot per channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelValues([Option<f64>; CHANNEL_COUNT]);

impl ChannelValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: Channel) -> Option<f64> {
        self.0[channel.index()]
    }

    pub fn set(&mut self, channel: Channel, value: Option<f64>) {
        self.0[channel.index()] = value;
    }

    /// Builder-style `set`, handy in tests and fixtures
    pub fn with(mut self, channel: Channel, value: f64) -> Self {
        self.set(channel, Some(value));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, Option<f64>)> + '_ {
        Channel::ALL.into_iter().map(move |c| (c, self.get(c)))
    }

    /// Number of channels holding a value
    pub fn present(&self) -> usize {
        self.0.iter().filter(|v| v.is_some()).count()
    }
}

impl Serialize for ChannelValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(CHANNEL_COUNT))?;
        for (channel, value) in self.iter() {
            map.serialize_entry(channel.name(), &value)?;
        }
        map.end()
    }
}
