use crate::driver::LoweringConfig;

/// Hands out the names of synthesized functions and temporaries. One
/// generator lives for a single lowering run, so separate runs never share
/// counters.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    anon_prefix: String,
    temporary_prefix: String,
    split_prefix: String,
    anon: usize,
    temporary: usize,
    split: usize,
}

impl NameGenerator {
    pub fn new(config: &LoweringConfig) -> Self {
        Self {
            anon_prefix: config.anon_prefix.clone(),
            temporary_prefix: config.temporary_prefix.clone(),
            split_prefix: config.split_prefix.clone(),
            anon: 0,
            temporary: 0,
            split: 0,
        }
    }

    /// Name of the function generated for a map stage (`anon0`, `anon1`, ...)
    pub fn anon(&mut self) -> String {
        Self::next(&self.anon_prefix, &mut self.anon)
    }

    /// Name of a pipeline temporary (`_t0`, `_t1`, ...)
    pub fn temporary(&mut self) -> String {
        Self::next(&self.temporary_prefix, &mut self.temporary)
    }

    /// Name of a function split off a kernel (`split0`, ...)
    pub fn split(&mut self) -> String {
        Self::next(&self.split_prefix, &mut self.split)
    }

    fn next(prefix: &str, counter: &mut usize) -> String {
        let name = format!("{prefix}{counter}");
        *counter += 1;
        name
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new(&LoweringConfig::default())
    }
}

/// Name of the `index`-th component of a multi-valued name (`p.0`, `p.1`, ...)
pub fn component(name: &str, index: usize) -> String {
    format!("{name}.{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent() {
        let mut names = NameGenerator::default();

        assert_eq!(names.anon(), "anon0");
        assert_eq!(names.temporary(), "_t0");
        assert_eq!(names.anon(), "anon1");
        assert_eq!(names.split(), "split0");
        assert_eq!(names.temporary(), "_t1");
    }

    #[test]
    fn generators_do_not_share_state() {
        let mut first = NameGenerator::default();
        first.anon();
        first.anon();

        let mut second = NameGenerator::default();
        assert_eq!(second.anon(), "anon0");
    }

    #[test]
    fn prefixes_come_from_the_config() {
        let config = LoweringConfig {
            anon_prefix: "lambda".into(),
            ..Default::default()
        };
        let mut names = NameGenerator::new(&config);

        assert_eq!(names.anon(), "lambda0");
        assert_eq!(component("p", 1), "p.1");
    }
}
