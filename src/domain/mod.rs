// Domain layer: plate geometry, design entities and the ports the core talks through.

pub mod model;
pub mod plate;
pub mod ports;
