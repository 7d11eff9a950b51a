mod catalog;
mod client;

pub use catalog::{Course, File, Folder, Module, ModuleItem, ModuleItemKind};
pub use client::{ApiErrorClass, CanvasClient, CanvasError, Page};
