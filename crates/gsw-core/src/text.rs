/// Case-folded, whitespace-free projection used for substring matching of
/// commands against rule keys and applicant names.
pub fn fold_for_match(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
