pub mod configs;
pub mod erase;
pub mod evaluate;
pub mod flash;
pub mod identify;
pub mod list;
pub mod memory;
pub mod option;
pub mod register;
pub mod reset;
