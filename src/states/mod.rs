pub mod batch_state;
