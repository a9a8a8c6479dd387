/// Lazily compiled static regex for literal patterns.
#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}

/// Build a [`PropertyMap`](crate::PropertyMap) from `name => value` pairs.
///
/// ```
/// use entity_resolver::{properties, TypedValue};
///
/// let props = properties! { "BUS" => 3u32, "NAME" => "psu" };
/// assert_eq!(props["BUS"], TypedValue::U32(3));
/// ```
#[macro_export]
macro_rules! properties {
    () => {
        $crate::PropertyMap::new()
    };
    ( $($name:expr => $value:expr),+ $(,)? ) => {{
        let mut map = $crate::PropertyMap::new();
        $( map.insert(::std::string::String::from($name), $crate::TypedValue::from($value)); )+
        map
    }};
}
