pub mod abort_monitor;
