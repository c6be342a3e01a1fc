// Application layer: wires configuration, clients and storage into runnable flows.

pub mod flows;
