//! Scene descriptors and the scene file format
//!
//! A scene is pure data: a name plus an ordered list of entity descriptors,
//! with no physics or visual handles. On disk it is JSON:
//!
//! ```json
//! {
//!   "name": "Untitled Scene",
//!   "entities": [
//!     { "type": "ball", "position": { "x": 0, "y": 0 }, "radius": 20 },
//!     { "type": "block", "position": { "x": 0, "y": 120 }, "width": 100,
//!       "height": 20, "rotation": 0, "pitch": 60 }
//!   ]
//! }
//! ```
//!
//! Optional fields fall back to defaults. Descriptors with an unrecognized
//! `type` are kept verbatim so newer files survive a load/save cycle.

use glam::Vec2;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::consts::*;
use crate::error::{SceneError, Warning};

/// `Vec2` as `{ "x": .., "y": .. }`
mod point {
    use glam::Vec2;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Point {
        x: f32,
        y: f32,
    }

    pub fn serialize<S: Serializer>(v: &Vec2, serializer: S) -> Result<S::Ok, S::Error> {
        Point { x: v.x, y: v.y }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec2, D::Error> {
        let p = Point::deserialize(deserializer)?;
        Ok(Vec2::new(p.x, p.y))
    }
}

fn default_ball_radius() -> f32 {
    BALL_RADIUS
}

fn default_block_width() -> f32 {
    BLOCK_WIDTH
}

fn default_block_height() -> f32 {
    BLOCK_HEIGHT
}

fn default_block_pitch() -> u8 {
    BLOCK_PITCH
}

/// A dynamic ball
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallDescriptor {
    #[serde(with = "point")]
    pub position: Vec2,
    #[serde(default = "default_ball_radius")]
    pub radius: f32,
    /// Fields this build does not read, written back on save
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BallDescriptor {
    pub fn new(position: Vec2, radius: f32) -> Self {
        Self {
            position,
            radius,
            extra: Map::new(),
        }
    }

    /// Reject values the scene format cannot load back
    pub fn validate(&self, index: usize) -> Result<(), SceneError> {
        check_finite(index, "position.x", self.position.x)?;
        check_finite(index, "position.y", self.position.y)?;
        check_size(index, "radius", self.radius)
    }
}

/// A static, pitched block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    #[serde(with = "point")]
    pub position: Vec2,
    #[serde(default = "default_block_width")]
    pub width: f32,
    #[serde(default = "default_block_height")]
    pub height: f32,
    /// Radians
    #[serde(default)]
    pub rotation: f32,
    /// MIDI note number
    #[serde(default = "default_block_pitch")]
    pub pitch: u8,
    /// Fields this build does not read, written back on save
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlockDescriptor {
    /// Default-sized, unrotated block
    pub fn new(position: Vec2, pitch: u8) -> Self {
        Self {
            position,
            width: BLOCK_WIDTH,
            height: BLOCK_HEIGHT,
            rotation: 0.0,
            pitch,
            extra: Map::new(),
        }
    }

    /// Reject values the scene format cannot load back
    pub fn validate(&self, index: usize) -> Result<(), SceneError> {
        check_finite(index, "position.x", self.position.x)?;
        check_finite(index, "position.y", self.position.y)?;
        check_size(index, "width", self.width)?;
        check_size(index, "height", self.height)?;
        check_finite(index, "rotation", self.rotation)?;
        if self.pitch > MAX_PITCH {
            return Err(invalid(index, format!("pitch {} is above 127", self.pitch)));
        }
        Ok(())
    }

    pub fn sized(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn rotated(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Descriptor with a tag this build does not know, kept as written
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownDescriptor {
    pub kind: String,
    /// The whole object, `type` included
    pub fields: Map<String, Value>,
}

/// One entity in a scene
#[derive(Debug, Clone, PartialEq)]
pub enum EntityDescriptor {
    Ball(BallDescriptor),
    Block(BlockDescriptor),
    Unknown(UnknownDescriptor),
}

impl EntityDescriptor {
    /// The `type` tag
    pub fn kind(&self) -> &str {
        match self {
            EntityDescriptor::Ball(_) => "ball",
            EntityDescriptor::Block(_) => "block",
            EntityDescriptor::Unknown(unknown) => &unknown.kind,
        }
    }

    /// Check a descriptor sitting at `index`. Unknown kinds are opaque and
    /// always pass.
    pub fn validate(&self, index: usize) -> Result<(), SceneError> {
        match self {
            EntityDescriptor::Ball(ball) => ball.validate(index),
            EntityDescriptor::Block(block) => block.validate(index),
            EntityDescriptor::Unknown(_) => Ok(()),
        }
    }
}

impl From<BallDescriptor> for EntityDescriptor {
    fn from(ball: BallDescriptor) -> Self {
        EntityDescriptor::Ball(ball)
    }
}

impl From<BlockDescriptor> for EntityDescriptor {
    fn from(block: BlockDescriptor) -> Self {
        EntityDescriptor::Block(block)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedRef<'a> {
    Ball(&'a BallDescriptor),
    Block(&'a BlockDescriptor),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Tagged {
    Ball(BallDescriptor),
    Block(BlockDescriptor),
}

impl Serialize for EntityDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EntityDescriptor::Ball(ball) => TaggedRef::Ball(ball).serialize(serializer),
            EntityDescriptor::Block(block) => TaggedRef::Block(block).serialize(serializer),
            EntityDescriptor::Unknown(unknown) => unknown.fields.serialize(serializer),
        }
    }
}

/// Top-level file shape before entities are interpreted
#[derive(Deserialize)]
struct RawScene {
    #[serde(default)]
    name: Option<String>,
    entities: Vec<Value>,
}

fn invalid(index: usize, reason: impl Into<String>) -> SceneError {
    SceneError::InvalidEntity {
        index,
        reason: reason.into(),
    }
}

fn check_finite(index: usize, what: &str, value: f32) -> Result<(), SceneError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(index, format!("{what} is not finite")))
    }
}

fn check_size(index: usize, what: &str, value: f32) -> Result<(), SceneError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(index, format!("{what} must be positive, got {value}")))
    }
}

fn parse_entity(index: usize, value: Value) -> Result<(EntityDescriptor, Option<Warning>), SceneError> {
    let Value::Object(fields) = value else {
        return Err(invalid(index, "expected an object"));
    };
    let kind = match fields.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => return Err(invalid(index, "`type` must be a string")),
        None => return Err(invalid(index, "missing `type`")),
    };

    if kind != "ball" && kind != "block" {
        let warning = Warning::UnknownEntityType {
            index,
            kind: kind.clone(),
        };
        return Ok((
            EntityDescriptor::Unknown(UnknownDescriptor { kind, fields }),
            Some(warning),
        ));
    }

    let tagged: Tagged =
        serde_json::from_value(Value::Object(fields)).map_err(|e| invalid(index, e.to_string()))?;
    let descriptor = match tagged {
        Tagged::Ball(ball) => EntityDescriptor::Ball(ball),
        Tagged::Block(block) => EntityDescriptor::Block(block),
    };
    descriptor.validate(index)?;
    Ok((descriptor, None))
}

/// A named, ordered list of entity descriptors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    pub name: String,
    entities: Vec<EntityDescriptor>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(DEFAULT_SCENE_NAME)
    }
}

impl Scene {
    /// Empty scene
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
        }
    }

    /// Scene from a descriptor list, validated like a loaded file
    pub fn with_entities(
        name: impl Into<String>,
        entities: Vec<EntityDescriptor>,
    ) -> Result<Self, SceneError> {
        for (index, descriptor) in entities.iter().enumerate() {
            descriptor.validate(index)?;
        }
        Ok(Self {
            name: name.into(),
            entities,
        })
    }

    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Add a descriptor at the end. A descriptor that could not be loaded
    /// back from the saved scene is rejected and the scene is unchanged.
    pub fn append(&mut self, descriptor: impl Into<EntityDescriptor>) -> Result<(), SceneError> {
        let descriptor = descriptor.into();
        descriptor.validate(self.entities.len())?;
        self.entities.push(descriptor);
        Ok(())
    }

    /// Remove the most recently appended descriptor (undo). No-op when empty.
    pub fn truncate(&mut self) -> Option<EntityDescriptor> {
        self.entities.pop()
    }

    /// Pretty-printed JSON
    pub fn serialize(&self) -> String {
        // Every way in validates, so there are no non-finite floats and keys
        // are strings: serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Parse scene JSON, logging any warnings.
    pub fn deserialize(text: &str) -> Result<Self, SceneError> {
        let (scene, warnings) = Self::deserialize_with_warnings(text)?;
        for warning in &warnings {
            log::warn!("Scene {:?}: {warning}", scene.name);
        }
        Ok(scene)
    }

    /// Parse scene JSON, returning unknown-tag warnings to the caller.
    pub fn deserialize_with_warnings(text: &str) -> Result<(Self, Vec<Warning>), SceneError> {
        let raw: RawScene = serde_json::from_str(text)?;
        let mut warnings = Vec::new();
        let mut entities = Vec::with_capacity(raw.entities.len());

        for (index, value) in raw.entities.into_iter().enumerate() {
            let (descriptor, warning) = parse_entity(index, value)?;
            entities.push(descriptor);
            warnings.extend(warning);
        }

        let name = raw
            .name
            .unwrap_or_else(|| DEFAULT_SCENE_NAME.to_string());
        Ok((Self { name, entities }, warnings))
    }
}
