//! Product data model and state machine.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of appliance moving through the pipeline. Wire order matters:
/// it is serialized as the declaration-order index, not the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductKind {
    Washer,
    Dryer,
    Refrigerator,
    Dishwasher,
    Oven,
}

impl ProductKind {
    pub const ALL: [ProductKind; 5] = [
        ProductKind::Washer,
        ProductKind::Dryer,
        ProductKind::Refrigerator,
        ProductKind::Dishwasher,
        ProductKind::Oven,
    ];

    pub fn to_wire(self) -> u8 {
        match self {
            ProductKind::Washer => 0,
            ProductKind::Dryer => 1,
            ProductKind::Refrigerator => 2,
            ProductKind::Dishwasher => 3,
            ProductKind::Oven => 4,
        }
    }

    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(ProductKind::Washer),
            1 => Some(ProductKind::Dryer),
            2 => Some(ProductKind::Refrigerator),
            3 => Some(ProductKind::Dishwasher),
            4 => Some(ProductKind::Oven),
            _ => None,
        }
    }
}

/// The product's position in the pipeline. Wire order matters, same rule
/// as `ProductKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductState {
    Created,
    AtIntake,
    AtAssembler,
    AtQualityInspection,
    AtPackaging,
    AtShipping,
    Finished,
    Rejected,
    InRework,
}

impl ProductState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProductState::Finished | ProductState::Rejected)
    }

    pub fn to_wire(self) -> u8 {
        match self {
            ProductState::Created => 0,
            ProductState::AtIntake => 1,
            ProductState::AtAssembler => 2,
            ProductState::AtQualityInspection => 3,
            ProductState::AtPackaging => 4,
            ProductState::AtShipping => 5,
            ProductState::Finished => 6,
            ProductState::Rejected => 7,
            ProductState::InRework => 8,
        }
    }

    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(ProductState::Created),
            1 => Some(ProductState::AtIntake),
            2 => Some(ProductState::AtAssembler),
            3 => Some(ProductState::AtQualityInspection),
            4 => Some(ProductState::AtPackaging),
            5 => Some(ProductState::AtShipping),
            6 => Some(ProductState::Finished),
            7 => Some(ProductState::Rejected),
            8 => Some(ProductState::InRework),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub station: String,
    pub at: DateTime<Utc>,
}

/// A unit moving through the five stations. `rework_count` and the internal
/// use of `InRework` are not part of the wire contract (see `ProductWire`);
/// they exist to support the rework back-edge and its test-configurable cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub kind: ProductKind,
    pub state: ProductState,
    pub created_at: DateTime<Utc>,
    pub trace: Vec<TraceEntry>,
    pub in_rework: bool,
    pub rework_count: u32,
}

impl Product {
    pub fn new(kind: ProductKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            state: ProductState::Created,
            created_at: Utc::now(),
            trace: Vec::with_capacity(5),
            in_rework: false,
            rework_count: 0,
        }
    }

    pub fn record_trace(&mut self, station: &str) {
        self.trace.push(TraceEntry {
            station: station.to_string(),
            at: Utc::now(),
        });
    }

    /// Moves the state forward exactly one step. The only non-linear edge is
    /// `InRework`, which returns to `AtAssembler` and clears the flag that
    /// `send_to_rework` set.
    pub fn advance(&mut self) {
        use ProductState::*;
        self.state = match self.state {
            Created => AtIntake,
            AtIntake => AtAssembler,
            AtAssembler => AtQualityInspection,
            AtQualityInspection => AtPackaging,
            AtPackaging => AtShipping,
            AtShipping => Finished,
            InRework => {
                self.in_rework = false;
                AtAssembler
            }
            Finished | Rejected => {
                debug_assert!(false, "advance() called on a terminal product state");
                self.state
            }
        };
    }

    /// The quality-inspection rework back-edge: instead of progressing to
    /// Packaging, the product is marked for another pass through Assembler.
    pub fn send_to_rework(&mut self) {
        self.in_rework = true;
        self.rework_count += 1;
        self.state = ProductState::InRework;
    }

    pub fn reject(&mut self) {
        self.state = ProductState::Rejected;
    }

    pub fn to_wire(&self) -> ProductWire {
        ProductWire {
            id: self.id,
            kind: self.kind,
            state: self.state,
            created_at: self.created_at,
            trace: self.trace.iter().map(|t| t.station.clone()).collect(),
            in_rework: self.in_rework,
        }
    }
}

/// The spec-mandated wire shape: `type`/`currentState` as declaration-order
/// integers, `trace` as bare station-name strings. Distinct from the
/// in-memory `Product`, which keeps richer, typed fields and per-entry
/// timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductWire {
    pub id: Uuid,
    pub kind: ProductKind,
    pub state: ProductState,
    pub created_at: DateTime<Utc>,
    pub trace: Vec<String>,
    pub in_rework: bool,
}

impl Serialize for ProductWire {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", &self.kind.to_wire())?;
        map.serialize_entry("currentState", &self.state.to_wire())?;
        map.serialize_entry("createdTime", &self.created_at.to_rfc3339())?;
        map.serialize_entry("trace", &self.trace)?;
        map.serialize_entry("inRework", &self.in_rework)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProductWire {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProductWireVisitor;

        impl<'de> Visitor<'de> for ProductWireVisitor {
            type Value = ProductWire;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a product wire object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut id = None;
                let mut kind = None;
                let mut state = None;
                let mut created_time: Option<String> = None;
                let mut trace = None;
                let mut in_rework = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "id" => id = Some(map.next_value()?),
                        "type" => {
                            let raw: u8 = map.next_value()?;
                            kind = Some(
                                ProductKind::from_wire(raw)
                                    .ok_or_else(|| de::Error::custom(format!("invalid type code {raw}")))?,
                            );
                        }
                        "currentState" => {
                            let raw: u8 = map.next_value()?;
                            state = Some(
                                ProductState::from_wire(raw)
                                    .ok_or_else(|| de::Error::custom(format!("invalid state code {raw}")))?,
                            );
                        }
                        "createdTime" => created_time = Some(map.next_value()?),
                        "trace" => trace = Some(map.next_value()?),
                        "inRework" => in_rework = Some(map.next_value()?),
                        _ => {
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }

                let created_time = created_time.ok_or_else(|| de::Error::missing_field("createdTime"))?;
                let created_at = DateTime::parse_from_rfc3339(&created_time)
                    .map_err(de::Error::custom)?
                    .with_timezone(&Utc);

                Ok(ProductWire {
                    id: id.ok_or_else(|| de::Error::missing_field("id"))?,
                    kind: kind.ok_or_else(|| de::Error::missing_field("type"))?,
                    state: state.ok_or_else(|| de::Error::missing_field("currentState"))?,
                    created_at,
                    trace: trace.ok_or_else(|| de::Error::missing_field("trace"))?,
                    in_rework: in_rework.unwrap_or(false),
                })
            }
        }

        deserializer.deserialize_map(ProductWireVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_walks_the_happy_path() {
        let mut p = Product::new(ProductKind::Washer);
        assert_eq!(p.state, ProductState::Created);
        p.advance();
        assert_eq!(p.state, ProductState::AtIntake);
        p.advance();
        assert_eq!(p.state, ProductState::AtAssembler);
        p.advance();
        assert_eq!(p.state, ProductState::AtQualityInspection);
        p.advance();
        assert_eq!(p.state, ProductState::AtPackaging);
        p.advance();
        assert_eq!(p.state, ProductState::AtShipping);
        p.advance();
        assert_eq!(p.state, ProductState::Finished);
        assert!(p.state.is_terminal());
    }

    #[test]
    fn rework_returns_to_assembler_and_clears_flag() {
        let mut p = Product::new(ProductKind::Oven);
        p.send_to_rework();
        assert_eq!(p.state, ProductState::InRework);
        assert!(p.in_rework);
        assert_eq!(p.rework_count, 1);
        p.advance();
        assert_eq!(p.state, ProductState::AtAssembler);
        assert!(!p.in_rework);
    }

    #[test]
    fn wire_round_trip_preserves_fields() {
        let mut p = Product::new(ProductKind::Dishwasher);
        p.record_trace("Intake");
        p.advance();
        p.record_trace("Assembler");
        let wire = p.to_wire();

        let json = serde_json::to_string(&wire).unwrap();
        let decoded: ProductWire = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, wire);
    }

    #[test]
    fn wire_encodes_declaration_order_integers() {
        let p = Product::new(ProductKind::Refrigerator);
        let wire = p.to_wire();
        let value: serde_json::Value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["type"], 2);
        assert_eq!(value["currentState"], 0);
    }
}
