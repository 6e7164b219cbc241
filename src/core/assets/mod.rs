// ─── Help Bundle ───
// Markdown help pages compiled into the binary.

const PAGES: &[(&str, &[u8])] = &[
    ("overview", include_bytes!("../../../help/overview.md")),
    ("upgrade", include_bytes!("../../../help/upgrade.md")),
    ("runtimes", include_bytes!("../../../help/runtimes.md")),
    ("troubleshooting", include_bytes!("../../../help/troubleshooting.md")),
];

/// Page names in display order.
pub fn help_pages() -> impl Iterator<Item = &'static str> {
    PAGES.iter().map(|(name, _)| *name)
}

/// Raw bytes of a help page; `.md` suffix optional.
pub fn help_page(name: &str) -> Option<&'static [u8]> {
    let name = name.strip_suffix(".md").unwrap_or(name);
    PAGES
        .iter()
        .find(|(page, _)| *page == name)
        .map(|(_, bytes)| *bytes)
}
