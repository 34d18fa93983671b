macro_rules! impl_ops {
    ($name:ident, $type:ty, $doc:expr) => {
        #[doc = concat!("A ", $doc, ".")]
        #[derive(
            Default,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        pub struct $name(pub $type);

        impl $name {
            #[doc = concat!("Creates a new instance of the `", stringify!($name), "` type.")]
            pub const fn new(value: $type) -> Self {
                Self(value)
            }
        }

        impl From<$type> for $name {
            fn from(value: $type) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $type {
            fn from(value: $name) -> $type {
                value.0
            }
        }

        impl ::std::ops::Add<$type> for $name {
            type Output = $name;

            fn add(self, rhs: $type) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl ::std::ops::Add<$name> for $name {
            type Output = $name;

            fn add(self, rhs: $name) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl ::std::ops::Sub<$type> for $name {
            type Output = $name;

            fn sub(self, rhs: $type) -> Self::Output {
                Self(self.0 - rhs)
            }
        }

        impl ::std::ops::Sub<$name> for $name {
            type Output = $type;

            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }

        impl ::std::ops::BitAnd<$type> for $name {
            type Output = $name;

            fn bitand(self, rhs: $type) -> Self::Output {
                Self(self.0 & rhs)
            }
        }

        impl ::std::ops::BitAndAssign<$type> for $name {
            fn bitand_assign(&mut self, rhs: $type) {
                self.0 &= rhs;
            }
        }

        impl ::std::ops::BitOr<$type> for $name {
            type Output = $name;

            fn bitor(self, rhs: $type) -> Self::Output {
                Self(self.0 | rhs)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "0x{:016x}", self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "0x{:016x}", self.0)
            }
        }

        impl ::std::fmt::LowerHex for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                ::std::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

pub(crate) use impl_ops;
