//! Ядро read-only парсера NTFS: boot-сектор, записи MFT, fixup,
//! поток атрибутов, runlist'ы и ленивое чтение кластеров.

// Ядро рассчитано на little-endian хост; big-endian отсекается при сборке
#[cfg(target_endian = "big")]
compile_error!("поддерживаются только little-endian хосты");

pub mod attributes;
pub mod boot;
pub mod errors;
pub mod fixup;
pub mod lazy;
pub mod path_builder;
pub mod record;
pub mod runlist;
pub mod utils;
pub mod volume;
pub mod walker;
