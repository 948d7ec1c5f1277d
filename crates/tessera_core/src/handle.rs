//! Opaque resource handles
//!
//! Every pooled resource is addressed by a 1-based `u32`. The value 0 is
//! reserved for "none", so a default-constructed handle is always a safe no-op.

/// Conversion between a typed handle and its raw slot value
pub trait SlotKey: Copy + Eq + std::fmt::Debug {
    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// The reserved "no resource" handle
            pub const INVALID: $name = $name(0);

            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl SlotKey for $name {
            fn from_raw(raw: u32) -> Self {
                $name(raw)
            }

            fn raw(self) -> u32 {
                self.0
            }
        }

        impl From<$name> for u32 {
            fn from(handle: $name) -> u32 {
                handle.0
            }
        }
    };
}

define_handle!(
    /// Compiled geometry batch
    GeometryHandle
);
define_handle!(
    /// Compiled filter
    FilterHandle
);
define_handle!(
    /// Compiled shader (gradients and procedural effects)
    ShaderHandle
);
define_handle!(
    /// Registered texture; 0 selects the solid color path
    TextureHandle
);
define_handle!(
    /// Open file stream
    FileHandle
);

/// Index of a layer on the render layer stack (0 is the root layer)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerHandle(pub u32);

impl LayerHandle {
    pub const ROOT: LayerHandle = LayerHandle(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}
