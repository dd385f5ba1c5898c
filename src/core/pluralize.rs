//! Plural URL segments for model names
//!
//! Models are exposed under the lower-cased plural of their name
//! (`MyModel` → `/mymodels`, `Category` → `/categories`).

/// Utility for deriving the collection segment of a model
pub struct Pluralizer;

impl Pluralizer {
    /// Route segment for a model name: lower-cased, then pluralized
    ///
    /// # Examples
    ///
    /// ```
    /// use model_rest::core::pluralize::Pluralizer;
    ///
    /// assert_eq!(Pluralizer::route_segment("MyModel"), "mymodels");
    /// assert_eq!(Pluralizer::route_segment("user"), "users");
    /// assert_eq!(Pluralizer::route_segment("Company"), "companies");
    /// ```
    pub fn route_segment(model_name: &str) -> String {
        Self::pluralize(&model_name.to_lowercase())
    }

    /// Convert a singular English noun to its plural form
    ///
    /// # Examples
    ///
    /// ```
    /// use model_rest::core::pluralize::Pluralizer;
    ///
    /// assert_eq!(Pluralizer::pluralize("address"), "addresses");
    /// assert_eq!(Pluralizer::pluralize("knife"), "knives");
    /// ```
    pub fn pluralize(singular: &str) -> String {
        if singular.is_empty() {
            return singular.to_string();
        }

        match singular {
            // consonant + y -> ies
            s if s.len() > 1
                && s.ends_with('y')
                && !matches!(s.as_bytes()[s.len() - 2], b'a' | b'e' | b'i' | b'o' | b'u') =>
            {
                format!("{}ies", &s[..s.len() - 1])
            }

            s if s.ends_with('s')
                || s.ends_with("sh")
                || s.ends_with("ch")
                || s.ends_with('x')
                || s.ends_with('z') =>
            {
                format!("{}es", s)
            }

            s if s.ends_with("fe") && s.len() > 2 => format!("{}ves", &s[..s.len() - 2]),

            s if s.ends_with('f') && s.len() > 1 => format!("{}ves", &s[..s.len() - 1]),

            s if s.ends_with('o') && s.len() > 1 => {
                let before_o = s.as_bytes()[s.len() - 2];
                if matches!(before_o, b'a' | b'e' | b'i' | b'o' | b'u') {
                    format!("{}s", s)
                } else {
                    match s {
                        "photo" | "piano" | "halo" | "memo" | "logo" => format!("{}s", s),
                        _ => format!("{}es", s),
                    }
                }
            }

            s => format!("{}s", s),
        }
    }
}
