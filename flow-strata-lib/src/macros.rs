/// Declares a protocol-number newtype with named constants.
///
/// The generated type wraps a zerocopy integer so it can sit directly inside
/// `#[repr(C, packed)]` header layouts. A private shadow enum drives the
/// strum name lookup used by `Display`, `is_valid` and the optional
/// name-based serde representation (`protocol_names` feature).
#[macro_export]
macro_rules! protocol_constants {
    (@wrap_u8 $ztype:ty, $val:tt) => { $val };
    (@wrap_new $ztype:ty, $val:tt) => { <$ztype>::new($val) };

    (@impl
        $(#[$outer:meta])*,
        $type_name:ident, $ztype:ty, $primitive:ty, $wrap:ident,
        $( $(#[$default:ident])? $const_name:ident = $val:tt; )+
    ) => {
        paste::paste! {
            $(#[$outer])*
            #[repr(transparent)]
            #[derive(
                Clone,
                Copy,
                PartialEq,
                Eq,
                Hash,
                Debug,
                zerocopy::FromBytes,
                zerocopy::IntoBytes,
                zerocopy::Immutable,
                zerocopy::KnownLayout,
                zerocopy::Unaligned,
            )]
            pub struct $type_name(pub $ztype);

            impl $type_name {
                $(
                    pub const $const_name: $type_name =
                        $type_name($crate::protocol_constants!(@$wrap $ztype, $val));
                )+

                /// Raw protocol number.
                #[inline]
                pub fn value(&self) -> $primitive {
                    self.0.into()
                }

                /// Returns true when the value has a registered name.
                pub fn is_valid(&self) -> bool {
                    [< $type_name Name >]::try_from(self.value()).is_ok()
                }

                /// Registered name of the value, if any.
                pub fn name(&self) -> Option<&'static str> {
                    [< $type_name Name >]::try_from(self.value())
                        .ok()
                        .map(<&'static str>::from)
                }
            }

            impl Default for $type_name {
                fn default() -> Self {
                    $( $(if stringify!($default) == "default" {
                            return Self::$const_name;
                        })?
                    )+
                    Self::from(0 as $primitive)
                }
            }

            #[derive(Debug, PartialEq, strum::EnumString, strum::IntoStaticStr, Clone, Copy)]
            #[strum(serialize_all = "kebab-case")]
            #[allow(non_camel_case_types)]
            enum [< $type_name Name >] {
                $( $const_name, )+
            }

            impl From<[< $type_name Name >]> for $primitive {
                fn from(v: [< $type_name Name >]) -> Self {
                    match v {
                        $( [< $type_name Name >]::$const_name => $val, )+
                    }
                }
            }

            impl TryFrom<$primitive> for [< $type_name Name >] {
                type Error = ();
                fn try_from(v: $primitive) -> Result<Self, Self::Error> {
                    match v {
                        $( $val => Ok([< $type_name Name >]::$const_name), )+
                        _ => Err(()),
                    }
                }
            }

            impl From<$primitive> for $type_name {
                fn from(v: $primitive) -> Self {
                    Self(v.into())
                }
            }

            impl From<$type_name> for $primitive {
                fn from(v: $type_name) -> Self {
                    v.0.into()
                }
            }

            impl std::str::FromStr for $type_name {
                type Err = strum::ParseError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    let name: [< $type_name Name >] = s.parse()?;
                    Ok(Self::from(<$primitive>::from(name)))
                }
            }

            impl std::fmt::Display for $type_name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    match self.name() {
                        Some(name) => f.write_str(name),
                        None => write!(f, "0x{:x}", self.value()),
                    }
                }
            }

            impl serde::Serialize for $type_name {
                fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
                where
                    S: serde::Serializer,
                {
                    if cfg!(feature = "protocol_names") {
                        serializer.collect_str(self)
                    } else {
                        serde::Serialize::serialize(&self.value(), serializer)
                    }
                }
            }
        }
    };

    (
        $(#[$outer:meta])*
        $type_name:ident, u8, $primitive:ty:
        $( $(#[$default:ident])? $const_name:ident = $val:tt; )+
    ) => {
        $crate::protocol_constants!(@impl
            $(#[$outer])*,
            $type_name, u8, $primitive, wrap_u8,
            $( $(#[$default])? $const_name = $val; )+
        );
    };

    (
        $(#[$outer:meta])*
        $type_name:ident, $ztype:ty, $primitive:ty:
        $( $(#[$default:ident])? $const_name:ident = $val:tt; )+
    ) => {
        $crate::protocol_constants!(@impl
            $(#[$outer])*,
            $type_name, $ztype, $primitive, wrap_new,
            $( $(#[$default])? $const_name = $val; )+
        );
    };
}
