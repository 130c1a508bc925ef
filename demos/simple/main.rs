use std::sync::Arc;

use prosper::{
    scope, ExperimentConfig, ExperimentDefinition, FixedAlgorithm, InMemoryStore, Pick, Registry,
    Symbol, UserId, Variant,
};

#[tokio::main]
pub async fn main() -> prosper::Result<()> {
    env_logger::init();

    let headline = Symbol::new("headline");
    let variants = vec![
        Variant::new("control").with_pick(&headline, "Welcome back"),
        Variant::new("urgent").with_pick(&headline, "Only 3 seats left!"),
    ];

    // The store holds the canonical definition, as a database would.
    let store = Arc::new(InMemoryStore::with_definition(ExperimentDefinition {
        id: Some("homepage-headline".into()),
        name: "homepage-headline".to_owned(),
        variants: variants.clone(),
        is_enabled: true,
        variant_index: 0,
    }));

    let headline_pick: Pick<String> = prosper::pick(headline);

    // A real deployment plugs in a bandit here. This one hands out variants by user position.
    for (index, user) in ["alice", "bob"].into_iter().enumerate() {
        let store = store.clone();
        let variants = variants.clone();
        let setup = move || {
            Registry::new().with_experiment(
                ExperimentConfig::new("homepage-headline")
                    .variants(variants.clone())
                    .shared_store(store.clone())
                    .algorithm(FixedAlgorithm::new(index))
                    .assignment_logger(|event| println!("Assigned: {:?}", event))
                    .to_experiment()?,
            )
        };

        let user_id = UserId::from(user);
        let text = scope::run(setup, |registry| {
            let headline_pick = headline_pick.clone();
            async move {
                // Load the stored definition and this user's assignment.
                registry.refresh_all(Some(&user_id)).await?;
                headline_pick.get_cloned()
            }
        })
        .await?;

        println!("{user} sees: {text}");
    }

    println!("Stored assignments: {}", store.user_variant_count());
    Ok(())
}
