use crate::error::Error;

/// A column picked from an ordered list of candidate names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Column name as it appears in the source (original case).
    pub name: String,
    /// Position of the column in the source header.
    pub index: usize,
    /// The candidate that matched.
    pub candidate: String,
}

/// Pick the first candidate present in `available`.
///
/// With `case_insensitive`, `"POSTALCODE21"` matches a header `"postalcode21"`;
/// the header's own spelling is returned. Candidates are tried in order, so
/// earlier candidates win over earlier columns.
pub fn resolve_column<S: AsRef<str>>(
    context: &str,
    candidates: &[S],
    available: &[String],
    case_insensitive: bool,
) -> Result<Resolved, Error> {
    for candidate in candidates {
        let candidate = candidate.as_ref();
        let hit = available.iter().position(|name| {
            let name = name.trim();
            if case_insensitive { name.eq_ignore_ascii_case(candidate) } else { name == candidate }
        });
        if let Some(index) = hit {
            return Ok(Resolved {
                name: available[index].clone(),
                index,
                candidate: candidate.to_string(),
            });
        }
    }
    Err(Error::MissingColumn {
        context: context.to_string(),
        expected: candidates.iter().map(|c| c.as_ref().to_string()).collect(),
        available: available.to_vec(),
    })
}

/// Resolve every column in `required`, failing on the first absent one.
pub fn require_columns<S: AsRef<str>>(
    context: &str,
    required: &[S],
    available: &[String],
    case_insensitive: bool,
) -> Result<Vec<Resolved>, Error> {
    required.iter()
        .map(|name| resolve_column(context, std::slice::from_ref(name), available, case_insensitive))
        .collect()
}
