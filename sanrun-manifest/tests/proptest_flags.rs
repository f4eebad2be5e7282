//! Property-based tests for flag patching.
//!
//! Invariants:
//! - Pre-existing stub and link tokens survive, in order, without duplicates.
//! - Instrumentation tokens end up present exactly once.
//! - Everything outside `link.native` is untouched in the DSL form.

use proptest::prelude::*;
use sanrun_manifest::{
    FlagField, InstrumentationFlags, Manifest, ManifestPath, PatchMode, patch,
};

fn arb_tokens() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::string::string_regex(r"-(I|D|L|l)[a-z][a-z0-9_]{0,6}").unwrap(),
        0..5,
    )
}

fn only_original(result: &str, original: &[String]) -> Vec<String> {
    result
        .split_whitespace()
        .filter(|t| original.iter().any(|o| o == t))
        .map(str::to_string)
        .collect()
}

fn json_manifest(stub: &[String], link: &[String]) -> Manifest {
    let text = format!(
        "{{\n  \"native-stub\": [\"s.c\"],\n  \"link\": {{\n    \"native\": {{\n      \"stub-cc-flags\": \"{}\",\n      \"cc-link-flags\": \"{}\"\n    }}\n  }}\n}}\n",
        stub.join(" "),
        link.join(" ")
    );
    Manifest::parse(ManifestPath::new("p/moon.pkg.json").unwrap(), &text).unwrap()
}

fn dsl_manifest(stub: &[String], link: &[String]) -> (Manifest, String) {
    let text = format!(
        "// header comment\nimport {{\n  \"moonbitlang/core/json\",\n}}\n\noptions(\n  \"native-stub\": [\"s.c\"],\n  link: {{\n    \"native\": {{\n      \"stub-cc-flags\": \"{}\",\n      \"cc-link-flags\": \"{}\",\n    }},\n  }},\n)\n",
        stub.join(" "),
        link.join(" ")
    );
    let m = Manifest::parse(ManifestPath::new("p/moon.pkg").unwrap(), &text).unwrap();
    (m, text)
}

proptest! {
    #[test]
    fn json_patch_preserves_existing_tokens(stub in arb_tokens(), link in arb_tokens()) {
        let mut m = json_manifest(&stub, &link);
        patch(&mut m, PatchMode::Enable, &InstrumentationFlags::gnu()).unwrap();

        let new_stub = m.get(FlagField::StubCompileFlags).unwrap();
        let new_link = m.get(FlagField::LinkFlags).unwrap();
        prop_assert_eq!(only_original(&new_stub, &stub), stub.clone());
        prop_assert_eq!(only_original(&new_link, &link), link.clone());
        prop_assert_eq!(
            new_stub.split_whitespace().filter(|t| *t == "-fsanitize=address").count(),
            1
        );
        prop_assert!(new_link.starts_with("-fsanitize=address"));
    }

    #[test]
    fn dsl_patch_preserves_existing_tokens_and_surroundings(stub in arb_tokens(), link in arb_tokens()) {
        let (mut m, original) = dsl_manifest(&stub, &link);
        patch(&mut m, PatchMode::Enable, &InstrumentationFlags::gnu()).unwrap();

        let new_stub = m.get(FlagField::StubCompileFlags).unwrap();
        let new_link = m.get(FlagField::LinkFlags).unwrap();
        prop_assert_eq!(only_original(&new_stub, &stub), stub.clone());
        prop_assert_eq!(only_original(&new_link, &link), link.clone());

        let rendered = m.render();
        let header_end = original.find("options(").unwrap();
        prop_assert_eq!(&rendered[..header_end], &original[..header_end]);
        prop_assert!(rendered.ends_with("    },\n  },\n)\n"), "rendered manifest has unexpected trailer");
        prop_assert_eq!(m.native_sources(), vec!["s.c".to_string()]);
    }

    #[test]
    fn patching_twice_is_idempotent(stub in arb_tokens(), link in arb_tokens()) {
        let mut m = json_manifest(&stub, &link);
        let flags = InstrumentationFlags::gnu();
        patch(&mut m, PatchMode::Enable, &flags).unwrap();
        let once = m.render();
        patch(&mut m, PatchMode::Enable, &flags).unwrap();
        prop_assert_eq!(m.render(), once);
    }
}
