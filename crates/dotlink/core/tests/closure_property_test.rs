// Property test: the hierarchy closure is closed under supertype and
// interface edges for arbitrary well-formed hierarchies, and re-adding the
// seed is a no-op.

use dotlink_common::LoaderTier;
use dotlink_core::engine::registry::{add_with_ancestors, ClassSet};
use dotlink_core::runtime::memory::{ClassSpec, UniverseBuilder};
use dotlink_core::runtime::ClassGraph;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_closure_closed_under_hierarchy_edges(
        shape in prop::collection::vec((any::<u32>(), prop::collection::vec(any::<u32>(), 0..3usize)), 1..24usize),
        seed_pick in any::<u32>(),
    ) {
        let mut builder = UniverseBuilder::new();
        for (i, (super_raw, interface_raws)) in shape.iter().enumerate() {
            let mut spec = ClassSpec::new(&format!("gen/C{i}"), LoaderTier::BootCore);
            if i > 0 {
                spec = spec.super_class(&format!("gen/C{}", (*super_raw as usize) % i));
                for raw in interface_raws {
                    spec = spec.interface(&format!("gen/C{}", (*raw as usize) % i));
                }
            }
            builder = builder.class(spec);
        }
        let env = builder.build().unwrap();
        let all = env.all_classes();
        let seed = all[(seed_pick as usize) % all.len()];

        let mut set = ClassSet::new();
        add_with_ancestors(&mut set, &env, seed);

        prop_assert!(set.contains(seed));
        for class in &all {
            if set.contains(*class) {
                if let Some(super_class) = env.super_class(*class) {
                    prop_assert!(set.contains(super_class));
                }
                for interface in env.interfaces(*class) {
                    prop_assert!(set.contains(interface));
                }
            }
        }

        let len = set.len();
        add_with_ancestors(&mut set, &env, seed);
        prop_assert_eq!(set.len(), len);
    }
}
