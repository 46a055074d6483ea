use serde::{Deserialize, Serialize};

/// A single channel value stored in a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneValue {
    pub universe: usize,
    pub channel: usize,
    pub value: u8,
}

impl SceneValue {
    pub fn new(universe: usize, channel: usize, value: u8) -> Self {
        Self {
            universe,
            channel,
            value,
        }
    }

    pub fn address(&self) -> (usize, usize) {
        (self.universe, self.channel)
    }
}

/// Static set of channel values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SceneValues")]
pub struct Scene {
    values: Vec<SceneValue>,
}

/// Scene values as stored, in any order and possibly repeated.
#[derive(Deserialize)]
struct SceneValues {
    #[serde(default)]
    values: Vec<SceneValue>,
}

impl From<SceneValues> for Scene {
    fn from(stored: SceneValues) -> Self {
        Self::new(stored.values)
    }
}

impl Scene {
    pub fn new(values: impl IntoIterator<Item = SceneValue>) -> Self {
        let mut scene = Self::default();
        for value in values {
            scene.set_value(value);
        }
        scene
    }

    /// Sets a channel value, replacing any previous value for that address.
    /// Values stay sorted by address.
    pub fn set_value(&mut self, value: SceneValue) {
        match self
            .values
            .binary_search_by_key(&value.address(), SceneValue::address)
        {
            Ok(index) => self.values[index] = value,
            Err(index) => self.values.insert(index, value),
        }
    }

    pub fn unset_value(&mut self, universe: usize, channel: usize) {
        self.values.retain(|v| v.address() != (universe, channel));
    }

    pub fn value(&self, universe: usize, channel: usize) -> Option<u8> {
        self.values
            .binary_search_by_key(&(universe, channel), SceneValue::address)
            .ok()
            .map(|index| self.values[index].value)
    }

    pub fn values(&self) -> &[SceneValue] {
        &self.values
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub(crate) fn addresses(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.values.iter().map(SceneValue::address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_an_existing_address_replaces_it() {
        let mut scene = Scene::default();
        scene.set_value(SceneValue::new(0, 5, 10));
        scene.set_value(SceneValue::new(0, 1, 20));
        scene.set_value(SceneValue::new(0, 5, 30));

        assert_eq!(scene.values().len(), 2);
        assert_eq!(scene.values()[0].channel, 1);
        assert_eq!(scene.value(0, 5), Some(30));
    }

    #[test]
    fn unset_removes_only_the_address() {
        let mut scene = Scene::new([SceneValue::new(0, 1, 1), SceneValue::new(1, 1, 2)]);
        scene.unset_value(0, 1);
        assert_eq!(scene.value(0, 1), None);
        assert_eq!(scene.value(1, 1), Some(2));
    }
}
