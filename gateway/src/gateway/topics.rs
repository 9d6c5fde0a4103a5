//! Topic layout under `/gateways/{thing_name}`.

const ROOT: &str = "/gateways";

/// Builds the topics owned by one gateway instance.
#[derive(Debug, Clone)]
pub struct Topics {
    thing_name: String,
}

impl Topics {
    pub fn new(thing_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
        }
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Where temperature measurements of a room are published.
    pub fn temperature(&self, room_id: &str) -> String {
        self.room(room_id, "temperature")
    }

    /// Where moisture measurements of a plant are published.
    pub fn moisture(&self, plant_id: &str) -> String {
        self.plant(plant_id, "moisture")
    }

    /// Control topic for the fan of a room.
    pub fn fan(&self, room_id: &str) -> String {
        self.room(room_id, "fan")
    }

    /// Control topic for the sprinkler of a plant.
    pub fn sprinkler(&self, plant_id: &str) -> String {
        self.plant(plant_id, "sprinkler")
    }

    /// Filter matching the fan control topic of every room.
    pub fn fan_filter(&self) -> String {
        self.fan("+")
    }

    /// Filter matching the sprinkler control topic of every plant.
    pub fn sprinkler_filter(&self) -> String {
        self.sprinkler("+")
    }

    fn room(&self, room_id: &str, leaf: &str) -> String {
        format!("{}/{}/rooms/{}/{}", ROOT, self.thing_name, room_id, leaf)
    }

    fn plant(&self, plant_id: &str, leaf: &str) -> String {
        format!("{}/{}/plants/{}/{}", ROOT, self.thing_name, plant_id, leaf)
    }
}

/// Return the level of `topic` matched by the `+` wildcard of `filter`.
///
/// `None` when the topic does not match the filter level by level or the
/// filter has no `+`.
pub fn wildcard_segment<'a>(filter: &str, topic: &'a str) -> Option<&'a str> {
    let filter_levels: Vec<&str> = filter.split('/').collect();
    let topic_levels: Vec<&'a str> = topic.split('/').collect();
    if filter_levels.len() != topic_levels.len() {
        return None;
    }

    let mut captured = None;
    for (f, t) in filter_levels.iter().zip(topic_levels) {
        match *f {
            "+" => captured = captured.or(Some(t)),
            literal if literal == t => {}
            _ => return None,
        }
    }
    captured
}
