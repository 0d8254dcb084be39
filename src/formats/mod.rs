// src/formats/mod.rs

pub mod udi {
    include!("../image_types/udi.rs");
}
pub mod fdi {
    include!("../image_types/fdi.rs");
}
pub mod trd {
    include!("../image_types/trd.rs");
}
pub mod hfe {
    include!("../image_types/hfe.rs");
}
