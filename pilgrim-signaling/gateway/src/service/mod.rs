//! 服务启动与依赖装配

pub mod bootstrap;
mod wire;

pub use bootstrap::ApplicationBootstrap;
pub use wire::{ApplicationContext, initialize};
