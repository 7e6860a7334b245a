// Domain layer: records, schema and the collaborator ports the transform talks through.

pub mod model;
pub mod ports;
