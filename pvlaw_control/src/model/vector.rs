//! Named channel vectors (readbacks, actuators).
//!
//! Index `i` refers to the same physical device in every per-channel field
//! for the lifetime of one configuration load. Lookups by name go through a
//! map built once at construction and use exact matching only.

use std::collections::HashMap;

/// Where a channel's value comes from on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Its own scalar PV.
    Scalar,
    /// Element `index` of waveform `waveform` (index into `ControlVector::waveforms`).
    Waveform { waveform: usize, index: usize },
}

/// One channel of a control vector.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Device name as written in the matrix file.
    pub symbolic: String,
    /// PV name after cross-reference resolution.
    pub pv: String,
    /// Most recent value.
    pub value: f64,
    /// Value committed by the previous iteration.
    pub previous: f64,
    /// Value captured at startup (hold-present-values reference).
    pub initial: f64,
    /// Offset/setpoint subtracted to form the error.
    pub setpoint: f64,
    /// `value` minus the active reference.
    pub error: f64,
    /// Eligible for despiking.
    pub despike: bool,
    pub source: Source,
}

impl Channel {
    pub fn new(symbolic: &str, pv: &str) -> Self {
        Self {
            symbolic: symbolic.to_string(),
            pv: pv.to_string(),
            value: 0.0,
            previous: 0.0,
            initial: 0.0,
            setpoint: 0.0,
            error: 0.0,
            despike: true,
            source: Source::Scalar,
        }
    }
}

/// Ordered set of channels with exact-match name lookup.
#[derive(Debug, Clone, Default)]
pub struct ControlVector {
    channels: Vec<Channel>,
    index: HashMap<String, usize>,
    waveforms: Vec<String>,
}

impl ControlVector {
    /// Build from parallel symbolic and PV name lists.
    ///
    /// # Errors
    /// The first duplicated symbolic name.
    pub fn new(symbolic: &[String], pv: &[String]) -> Result<Self, String> {
        if symbolic.len() != pv.len() {
            return Err(format!(
                "{} symbolic names but {} PV names",
                symbolic.len(),
                pv.len()
            ));
        }
        let channels = symbolic
            .iter()
            .zip(pv)
            .map(|(s, p)| Channel::new(s, p))
            .collect();
        Self::from_channels(channels)
    }

    /// Build from prepared channels.
    pub fn from_channels(channels: Vec<Channel>) -> Result<Self, String> {
        let mut index = HashMap::with_capacity(channels.len() * 2);
        for (i, ch) in channels.iter().enumerate() {
            index.entry(ch.pv.clone()).or_insert(i);
        }
        for (i, ch) in channels.iter().enumerate() {
            if let Some(prev) = index.insert(ch.symbolic.clone(), i) {
                if prev != i && channels[prev].symbolic == ch.symbolic {
                    return Err(format!("duplicate channel name {}", ch.symbolic));
                }
            }
        }
        Ok(Self {
            channels,
            index,
            waveforms: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Channel> {
        self.channels.iter_mut()
    }

    pub fn get(&self, i: usize) -> Option<&Channel> {
        self.channels.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Channel> {
        self.channels.get_mut(i)
    }

    /// Index of the channel whose symbolic or PV name is exactly `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn symbolic_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.symbolic.clone()).collect()
    }

    pub fn pv_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.pv.clone()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.channels.iter().map(|c| c.value).collect()
    }

    pub fn previous_values(&self) -> Vec<f64> {
        self.channels.iter().map(|c| c.previous).collect()
    }

    pub fn errors(&self) -> Vec<f64> {
        self.channels.iter().map(|c| c.error).collect()
    }

    pub fn despike_mask(&self) -> Vec<bool> {
        self.channels.iter().map(|c| c.despike).collect()
    }

    /// Overwrite every `value`. Extra or missing entries are ignored.
    pub fn set_values(&mut self, values: &[f64]) {
        for (c, v) in self.channels.iter_mut().zip(values) {
            c.value = *v;
        }
    }

    /// Copy `value` into `previous` for every channel.
    pub fn commit_values(&mut self) {
        for c in &mut self.channels {
            c.previous = c.value;
        }
    }

    /// Copy `value` into `initial` and `previous` for every channel.
    pub fn capture_initial(&mut self) {
        for c in &mut self.channels {
            c.initial = c.value;
            c.previous = c.value;
        }
    }

    // ─── Waveform Sources ───────────────────────────────────────────

    /// Register a waveform PV, returning its index.
    pub fn add_waveform(&mut self, pv: &str) -> usize {
        if let Some(i) = self.waveforms.iter().position(|w| w == pv) {
            return i;
        }
        self.waveforms.push(pv.to_string());
        self.waveforms.len() - 1
    }

    /// Waveform PVs feeding this vector.
    pub fn waveforms(&self) -> &[String] {
        &self.waveforms
    }

    /// Indices and PV names of channels with their own scalar PV.
    pub fn scalar_channels(&self) -> (Vec<usize>, Vec<String>) {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.source == Source::Scalar)
            .map(|(i, c)| (i, c.pv.clone()))
            .unzip()
    }

    /// Channels fed by waveform `waveform`, as (channel, element) pairs.
    pub fn waveform_channels(&self, waveform: usize) -> Vec<(usize, usize)> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c.source {
                Source::Waveform { waveform: w, index } if w == waveform => Some((i, index)),
                _ => None,
            })
            .collect()
    }
}
