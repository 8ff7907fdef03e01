//! Search filters and their wire translation
//!
//! A [`Query`] is an immutable filter. Catalogs keep an append-only tuple of
//! them and translate the whole tuple into request parameters on every call
//! via [`queries_to_params`]. This module is the only place query semantics
//! touch the wire.

use std::fmt;

/// A search filter understood by the catalog server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// Exact match on an item's key
    KeyLookup { key: String },
    /// Free-text match on item metadata
    FullText { text: String },
}

impl Query {
    pub fn key_lookup(key: impl Into<String>) -> Self {
        Query::KeyLookup { key: key.into() }
    }

    pub fn full_text(text: impl Into<String>) -> Self {
        Query::FullText { text: text.into() }
    }

    /// Name the server registers this query type under
    pub fn name(&self) -> &'static str {
        match self {
            Query::KeyLookup { .. } => "lookup",
            Query::FullText { .. } => "fulltext",
        }
    }

    /// Condition fields in declaration order
    pub fn conditions(&self) -> Vec<(&'static str, &str)> {
        match self {
            Query::KeyLookup { key } => vec![("key", key.as_str())],
            Query::FullText { text } => vec![("text", text.as_str())],
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        for (i, (field, value)) in self.conditions().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", field, value)?;
        }
        write!(f, ")")
    }
}

/// `filter[<name>][condition][<field>]=<value>` for every condition of every query
pub fn queries_to_params<'a, I>(queries: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = &'a Query>,
{
    queries
        .into_iter()
        .flat_map(|query| {
            let name = query.name();
            query
                .conditions()
                .into_iter()
                .map(move |(field, value)| {
                    (
                        format!("filter[{}][condition][{}]", name, field),
                        value.to_string(),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_lookup_params() {
        let params = queries_to_params(&[Query::key_lookup("temperature")]);
        assert_eq!(
            params,
            vec![(
                "filter[lookup][condition][key]".to_string(),
                "temperature".to_string()
            )]
        );
    }

    #[test]
    fn test_params_keep_query_order() {
        let queries = [Query::full_text("ocean"), Query::full_text("salinity")];
        let params = queries_to_params(&queries);
        assert_eq!(params.len(), 2);
        assert!(params
            .iter()
            .all(|(k, _)| k == "filter[fulltext][condition][text]"));
        assert_eq!(params[0].1, "ocean");
        assert_eq!(params[1].1, "salinity");
    }

    #[test]
    fn test_no_queries_no_params() {
        assert!(queries_to_params(&Vec::<Query>::new()).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(Query::key_lookup("a").to_string(), "lookup(key=\"a\")");
        assert_eq!(Query::full_text("x y").to_string(), "fulltext(text=\"x y\")");
    }
}
