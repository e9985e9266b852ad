pub mod network_gen;
