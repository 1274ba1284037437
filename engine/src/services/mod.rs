pub mod map_events;
