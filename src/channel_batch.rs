use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type Channel = u16;
pub type DmxValue = u8;

// Backend convention is a JSON object keyed by channel index: {"0":128,"1":255}
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct ChannelBatch {
    values: IndexMap<Channel, DmxValue>,
}

impl ChannelBatch {
    pub fn new() -> Self {
        ChannelBatch {
            values: IndexMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ChannelBatch {
            values: IndexMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, channel: Channel, value: DmxValue) -> Option<DmxValue> {
        self.values.insert(channel, value)
    }

    pub fn get(&self, channel: Channel) -> Option<DmxValue> {
        self.values.get(&channel).copied()
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.values.contains_key(&channel)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, DmxValue)> + '_ {
        self.values.iter().map(|(channel, value)| (*channel, *value))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl FromIterator<(Channel, DmxValue)> for ChannelBatch {
    fn from_iter<I: IntoIterator<Item = (Channel, DmxValue)>>(iter: I) -> Self {
        ChannelBatch {
            values: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ChannelBatch {
    type Item = (Channel, DmxValue);
    type IntoIter = indexmap::map::IntoIter<Channel, DmxValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
