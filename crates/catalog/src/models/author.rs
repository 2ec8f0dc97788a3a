use super::EMPTY_FIELD_VALUE;

/// Split a comma-joined author string into the names that get indexed.
///
/// Every co-author is returned on their own. When there is more than one, the
/// full joined string follows as an extra entry so the exact co-author group
/// can be searched as well. Pieces are trimmed and empty ones dropped; a
/// string with no names left yields [`EMPTY_FIELD_VALUE`].
///
/// ```
/// use folio_catalog::models::split_authors;
///
/// assert_eq!(split_authors("Ivanov,Petrov"), vec!["Ivanov", "Petrov", "Ivanov,Petrov"]);
/// assert_eq!(split_authors("Sidorov"), vec!["Sidorov"]);
/// assert_eq!(split_authors(""), vec!["?"]);
/// ```
pub fn split_authors(author: &str) -> Vec<&str> {
    let mut names: Vec<&str> = author.split(',').map(str::trim).filter(|name| !name.is_empty()).collect();
    if names.is_empty() {
        return vec![EMPTY_FIELD_VALUE];
    }
    if names.len() > 1 {
        names.push(author);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("A,B,C", vec!["A", "B", "C", "A,B,C"])]
    #[case("A,", vec!["A"])]
    #[case("A, ,B", vec!["A", "B", "A, ,B"])]
    #[case(" , ", vec!["?"])]
    #[case("Single Name", vec!["Single Name"])]
    fn test_split_authors(#[case] input: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_authors(input), expected);
    }
}
