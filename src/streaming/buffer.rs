// Rolling multi-channel history for live charts
//
// Keeps the most recent samples as one timestamp series plus one series per
// channel. All series grow at the tail and shrink at the head together, so a
// chart can index any channel with the timestamp index.

use crate::streaming::channel::{Channel, ChannelValues, CHANNEL_COUNT};
use crate::streaming::decoder::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Default number of samples kept (~10 minutes at a 5 s sampling interval)
pub const HISTORY_CAPACITY: usize = 120;

/// Counters for buffer activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferMetrics {
    pub total_appended: u64,
    pub total_evicted: u64,
    pub current_size: usize,
    pub capacity: usize,
}

/// Fixed-capacity history with oldest-first eviction
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    timestamps: VecDeque<DateTime<Utc>>,
    series: [VecDeque<Option<f64>>; CHANNEL_COUNT],
    capacity: usize,
    total_appended: u64,
    total_evicted: u64,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Create a buffer holding at most `capacity` samples (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            timestamps: VecDeque::with_capacity(capacity + 1),
            series: std::array::from_fn(|_| VecDeque::with_capacity(capacity + 1)),
            capacity,
            total_appended: 0,
            total_evicted: 0,
        }
    }

    /// Append a sample at the tail, evicting the oldest sample once full
    pub fn append(&mut self, sample: &Sample) {
        self.timestamps.push_back(sample.timestamp);
        for channel in Channel::ALL {
            self.series[channel.index()].push_back(sample.channels.get(channel));
        }
        self.total_appended += 1;

        if self.timestamps.len() > self.capacity {
            self.timestamps.pop_front();
            for series in self.series.iter_mut() {
                series.pop_front();
            }
            self.total_evicted += 1;
        }
    }

    /// Drop every sample. Counters are kept.
    pub fn reset(&mut self) {
        self.timestamps.clear();
        for series in self.series.iter_mut() {
            series.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timestamps(&self) -> &VecDeque<DateTime<Utc>> {
        &self.timestamps
    }

    pub fn series(&self, channel: Channel) -> &VecDeque<Option<f64>> {
        &self.series[channel.index()]
    }

    /// Newest sample, if any
    pub fn latest(&self) -> Option<Sample> {
        let timestamp = *self.timestamps.back()?;
        let mut channels = ChannelValues::new();
        for channel in Channel::ALL {
            channels.set(channel, self.series(channel).back().copied().flatten());
        }
        Some(Sample { timestamp, channels })
    }

    /// Owned copy of the current contents
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            timestamps: self.timestamps.iter().copied().collect(),
            series: Channel::ALL
                .into_iter()
                .map(|c| (c, self.series(c).iter().copied().collect()))
                .collect(),
        }
    }

    pub fn get_metrics(&self) -> BufferMetrics {
        BufferMetrics {
            total_appended: self.total_appended,
            total_evicted: self.total_evicted,
            current_size: self.len(),
            capacity: self.capacity,
        }
    }
}

/// Point-in-time copy of a [`HistoryBuffer`], shaped for chart consumers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub timestamps: Vec<DateTime<Utc>>,
    #[serde(flatten)]
    pub series: BTreeMap<Channel, Vec<Option<f64>>>,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn series(&self, channel: Channel) -> &[Option<f64>] {
        self.series
            .get(&channel)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
