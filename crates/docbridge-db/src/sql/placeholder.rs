/// Hands out positional parameter markers: `$1`, `$2`, ...
#[derive(Debug)]
pub struct Placeholder(usize);

impl Default for Placeholder {
    fn default() -> Self {
        Self(1)
    }
}

impl Placeholder {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> String {
        let marker = format!("${}", self.0);
        self.0 += 1;
        marker
    }
}
