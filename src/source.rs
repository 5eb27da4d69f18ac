// Scope-source composition for execution units

/// Binding assignment generated for an injected helper name.
pub(crate) fn binding(name: &str) -> String {
    format!("self.{name} = ")
}

pub(crate) const MAIN_BINDING: &str = "self.onmessage = ";
const TERMINATOR: &str = ";";

/// One injected helper: binding assignment, body, terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Injection {
    name: String,
    assignment: String,
    body: String,
}

/// Ordered program fragments for one execution unit.
///
/// The trailing group is always `self.onmessage = <main>;` and is never
/// removed or reordered. Helper groups sit in front of it as
/// `(assignment, body, ";")` triples, most recently loaded first. Each
/// triple is stored as one logical group so removal is a name lookup and
/// a structured delete rather than index arithmetic on a flat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSource {
    injections: Vec<Injection>,
    main_body: String,
}

impl ScopeSource {
    pub fn new(main_body: impl Into<String>) -> Self {
        Self {
            injections: Vec::new(),
            main_body: main_body.into(),
        }
    }

    /// Prepend one helper triple. The newest injection ends up at the
    /// front of the fragment order, farthest from the main assignment.
    pub fn load(&mut self, name: impl Into<String>, body: impl Into<String>) {
        let name = name.into();
        let assignment = binding(&name);
        self.injections.insert(
            0,
            Injection {
                name,
                assignment,
                body: body.into(),
            },
        );
    }

    /// Excise the triple whose assignment matches the generated binding
    /// for `name`. Returns false (and leaves the source untouched) when
    /// the name was never loaded.
    pub fn remove(&mut self, name: &str) -> bool {
        let target = binding(name);
        match self
            .injections
            .iter()
            .position(|inj| inj.assignment == target)
        {
            Some(idx) => {
                self.injections.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.injections.iter().any(|inj| inj.name == name)
    }

    /// Flat fragment view in final program order.
    pub fn fragments(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.injections.len() * 3 + 3);
        for inj in &self.injections {
            out.push(inj.assignment.as_str());
            out.push(inj.body.as_str());
            out.push(TERMINATOR);
        }
        out.push(MAIN_BINDING);
        out.push(self.main_body.as_str());
        out.push(TERMINATOR);
        out
    }

    /// The complete program text handed to the backend.
    pub fn assemble(&self) -> String {
        self.fragments().concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_triple_is_always_trailing() {
        let mut source = ScopeSource::new("@fn:0");
        source.load("a", "@fn:1");

        let fragments = source.fragments();
        let tail = &fragments[fragments.len() - 3..];
        assert_eq!(tail, &["self.onmessage = ", "@fn:0", ";"]);
    }

    #[test]
    fn later_loads_land_in_front() {
        let mut source = ScopeSource::new("@fn:0");
        source.load("a", "@fn:1");
        source.load("b", "@fn:2");

        // Final fragment order is the reverse of load order.
        assert_eq!(
            source.assemble(),
            "self.b = @fn:2;self.a = @fn:1;self.onmessage = @fn:0;"
        );
    }

    #[test]
    fn load_then_remove_round_trips() {
        let mut source = ScopeSource::new("@fn:0");
        let pristine = source.clone();

        source.load("a", "@fn:1");
        source.load("b", "@fn:2");
        assert!(source.remove("a"));
        assert!(source.remove("b"));

        assert_eq!(source, pristine);
        assert_eq!(source.assemble(), pristine.assemble());
    }

    #[test]
    fn removing_unknown_name_is_a_no_op() {
        let mut source = ScopeSource::new("@fn:0");
        source.load("a", "@fn:1");
        let before = source.clone();

        assert!(!source.remove("missing"));
        assert_eq!(source, before);
    }

    #[test]
    fn is_loaded_tracks_injections() {
        let mut source = ScopeSource::new("@fn:0");
        assert!(!source.is_loaded("a"));
        source.load("a", "@fn:1");
        assert!(source.is_loaded("a"));
        source.remove("a");
        assert!(!source.is_loaded("a"));
    }
}
