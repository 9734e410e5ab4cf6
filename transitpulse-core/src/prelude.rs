pub use crate::Weight;
pub use crate::error::{Error, ErrorKind};

// Loading
pub use crate::loading::{BikeParking, FeedConfig, create_mode_graphs, load_bike_parkings};

// Graph model and store
pub use crate::model::{
    BIKE_MODE, Connector, EdgeRef, EdgeView, GraphSnapshot, ModeGraph, NetworkSnapshot, Node,
    NodeView, TripMetadata, WALKING_MODE,
};
pub use crate::store::{
    DEFAULT_NEAREST_EXCLUDE, EdgeChange, EdgePatch, EventContext, GraphMessage, GraphStore,
    NearestEdge, Subscription,
};

// Planning
pub use crate::routing::{PathEdge, PathResult, RoutePlan, plan};

// Incident impact
pub use crate::impact::{
    BLOCKING_MULTIPLIER, CategoryPolicy, CycleReport, ImpactConfig, ImpactEngine,
    InMemoryIncidentSource, IncidentRecord, IncidentSource, InfluenceRecord, Multiplier,
    PolicyTable,
};
