//! Slug derivation and year-scoped allocation.

use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;

/// Used when a title yields no slug characters at all.
pub const FALLBACK_SLUG: &str = "article";

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid slug regex"));
static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("valid slug regex"));

/// Derive a URL slug from a title: fold to ASCII, drop punctuation,
/// lowercase, and join words with single hyphens.
pub fn slugify(title: &str) -> String {
    let folded: String = title.chars().filter_map(fold_char).collect();
    let cleaned = DISALLOWED.replace_all(&folded, "");
    let lowered = cleaned.trim().to_ascii_lowercase();
    let joined = SEPARATORS.replace_all(&lowered, "-");
    let slug = joined.trim_matches('-');
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Map a character to ASCII, dropping what has no Latin equivalent.
fn fold_char(c: char) -> Option<char> {
    if c.is_ascii() {
        return Some(c);
    }
    if c.is_whitespace() {
        return Some(' ');
    }
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'ç' | 'ć' | 'č' => 'c',
        'Ç' | 'Ć' | 'Č' => 'C',
        'ď' | 'đ' => 'd',
        'Ď' | 'Đ' => 'D',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'ğ' => 'g',
        'Ğ' => 'G',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' | 'ı' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Į' | 'İ' => 'I',
        'ł' | 'ľ' | 'ĺ' => 'l',
        'Ł' | 'Ľ' | 'Ĺ' => 'L',
        'ñ' | 'ń' | 'ň' => 'n',
        'Ñ' | 'Ń' | 'Ň' => 'N',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => 'O',
        'ŕ' | 'ř' => 'r',
        'Ŕ' | 'Ř' => 'R',
        'ś' | 'š' | 'ş' => 's',
        'Ś' | 'Š' | 'Ş' => 'S',
        'ť' | 'ţ' => 't',
        'Ť' | 'Ţ' => 'T',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' | 'Ų' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' | 'Ÿ' => 'Y',
        'ź' | 'ż' | 'ž' => 'z',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        '–' | '—' => '-',
        _ => return None,
    };
    Some(folded)
}

/// Find a slug unused in `year`: `base`, then `base-1`, `base-2`, ...
///
/// `exists` is asked about each candidate in turn; its first error aborts
/// the search.
pub async fn allocate<F, Fut, E>(base: &str, year: i32, mut exists: F) -> Result<String, E>
where
    F: FnMut(i32, String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let mut candidate = base.to_string();
    let mut suffix: u64 = 0;
    while exists(year, candidate.clone()).await? {
        suffix += 1;
        candidate = format!("{base}-{suffix}");
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::convert::Infallible;
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn slugify_basic_titles() {
        assert_eq!(slugify("Hello"), "hello");
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Spaces   and\ttabs  "), "spaces-and-tabs");
        assert_eq!(slugify("already-a-slug"), "already-a-slug");
        assert_eq!(slugify("dash -- and -- space"), "dash-and-space");
        assert_eq!(slugify("snake_case stays"), "snake_case-stays");
    }

    #[test]
    fn slugify_folds_accents() {
        assert_eq!(slugify("Café Crème"), "cafe-creme");
        assert_eq!(slugify("Ærø"), "ro");
        assert_eq!(slugify("Zürich — Łódź"), "zurich-lodz");
    }

    #[test]
    fn slugify_falls_back_when_empty() {
        assert_eq!(slugify(""), FALLBACK_SLUG);
        assert_eq!(slugify("!!! ???"), FALLBACK_SLUG);
        assert_eq!(slugify("日本語"), FALLBACK_SLUG);
        assert_eq!(slugify("--- article from email ---"), "article-from-email");
    }

    #[tokio::test]
    async fn allocate_returns_base_when_free() {
        let slug = allocate("foo", 2020, |_, _| async { Ok::<_, Infallible>(false) })
            .await
            .unwrap();
        assert_eq!(slug, "foo");
    }

    #[tokio::test]
    async fn allocate_appends_counter_after_collision() {
        let taken: HashSet<(i32, String)> = [(2020, "foo".to_string())].into();
        let slug = allocate("foo", 2020, |year, candidate| {
            let hit = taken.contains(&(year, candidate));
            async move { Ok::<_, Infallible>(hit) }
        })
        .await
        .unwrap();
        assert_eq!(slug, "foo-1");

        let other_year = allocate("foo", 2021, |year, candidate| {
            let hit = taken.contains(&(year, candidate));
            async move { Ok::<_, Infallible>(hit) }
        })
        .await
        .unwrap();
        assert_eq!(other_year, "foo");
    }

    #[tokio::test]
    async fn repeated_allocation_stays_unique() {
        let taken = Mutex::new(HashSet::new());
        for _ in 0..25 {
            let slug = allocate("post", 2024, |_, candidate| {
                let hit = taken.lock().unwrap().contains(&candidate);
                async move { Ok::<_, Infallible>(hit) }
            })
            .await
            .unwrap();
            assert!(taken.lock().unwrap().insert(slug));
        }
        let taken = taken.into_inner().unwrap();
        assert_eq!(taken.len(), 25);
        assert!(taken.contains("post"));
        assert!(taken.contains("post-24"));
    }

    #[tokio::test]
    async fn allocate_propagates_lookup_errors() {
        let err = allocate("foo", 2020, |_, _| async { Err::<bool, _>("db down") })
            .await
            .unwrap_err();
        assert_eq!(err, "db down");
    }
}
