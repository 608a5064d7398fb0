use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use docgraph::{
    backend::StoreBackend,
    bson::{Bson, doc, oid::ObjectId},
    config::StoreConfig,
    memory::InMemoryStore,
    prelude::*,
};
use serde::Deserialize;

#[derive(Debug)]
struct Account(String);

impl Identified for Account {
    fn identity(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Default, Deserialize, Entity)]
#[entity(collection = "authors")]
struct Author {
    #[entity(id)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    books: Vec<EntityRef<Book>>,
    joined: Option<StoreDateTime>,
    #[entity(compute = "Author::display_name")]
    display: Option<String>,
    #[entity(skip)]
    #[serde(skip)]
    session: Option<String>,
    #[serde(skip)]
    account: Option<Arc<Account>>,
}

impl Author {
    fn new(name: &str) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    fn display_name(&self) -> String {
        format!("{} (author)", self.name)
    }
}

#[derive(Debug, Default, Deserialize, Entity)]
struct Book {
    #[entity(id)]
    id: Option<String>,
    title: String,
    author: Option<EntityRef<Author>>,
}

#[derive(Debug, Default, Deserialize, Entity)]
#[entity(collection = "keyed")]
struct Keyed {
    #[entity(id)]
    key: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize, Entity)]
struct Stamped {
    #[entity(id)]
    id: Option<String>,
    #[serde(with = "docgraph::value::unix_seconds")]
    at: DateTime<Utc>,
    #[serde(with = "docgraph::value::loose_bool", default)]
    published: Option<bool>,
}

fn book(title: &str) -> EntityRef<Book> {
    EntityRef::new(Book {
        id: Some(docgraph::identity::generate_identity()),
        title: title.into(),
        author: None,
    })
}

fn store() -> DocumentStore<InMemoryStore> {
    DocumentStore::new(InMemoryStore::new())
}

#[test]
fn derived_schema_follows_declaration_order() {
    let schema = Author::schema();
    let names: Vec<_> = schema.fields().iter().map(|f| f.name()).collect();

    assert_eq!(names, vec!["name", "books", "joined", "display", "session", "account"]);
    assert!(schema.get("session").unwrap().is_skipped());
    assert!(schema.get("display").unwrap().is_computed());
    assert_eq!(Author::collection_name(), "authors");
    assert_eq!(Book::collection_name(), "book");
    assert_eq!(Author::TYPE_NAME, "Author");
}

#[tokio::test]
async fn save_new_then_fetch_round_trips() {
    let store = store();
    let authors = store.repository::<Author>();

    let author = EntityRef::new(Author {
        books: vec![book("Notes"), book("Sketches")],
        joined: Some(StoreDateTime::from_timestamp(1_600_000_000).unwrap()),
        session: Some("secret".into()),
        ..Author::new("Ada")
    });

    let saved = authors.save(&author).await.unwrap();
    let id = saved.id().unwrap();
    assert!(!id.is_empty());
    assert_eq!(store.backend().count("authors").await, 1);

    let fetched = authors.get_by_id(&id).await.unwrap().unwrap();
    let fetched = fetched.read();

    assert_eq!(fetched.id.as_deref(), Some(id.as_str()));
    assert_eq!(fetched.name, "Ada");
    assert_eq!(fetched.joined.unwrap().timestamp(), 1_600_000_000);
    assert_eq!(fetched.display.as_deref(), Some("Ada (author)"));
    assert_eq!(fetched.session, None);

    let titles: Vec<_> = fetched.books.iter().map(|b| b.read().title.clone()).collect();
    assert_eq!(titles, vec!["Notes", "Sketches"]);
    assert_eq!(fetched.books[0].id(), author.read().books[0].id());
}

#[tokio::test]
async fn save_existing_preserves_fields_missing_from_entity() {
    let store = store();
    let authors = store.repository::<Author>();

    let oid = ObjectId::new();
    store
        .backend()
        .insert_one(
            doc! {
                "_id": oid,
                "name": "Grace",
                "joined": Bson::DateTime(docgraph::bson::DateTime::from_millis(0)),
                "legacy": "kept",
            },
            "authors",
        )
        .await
        .unwrap();

    let fetched = authors.get_by_id(&oid.to_hex()).await.unwrap().unwrap();
    {
        let mut author = fetched.write();
        author.name = "Grace Hopper".into();
        author.joined = None;
    }

    let saved = authors.save(&fetched).await.unwrap();
    assert_eq!(saved.read().name, "Grace Hopper");
    assert!(saved.read().joined.unwrap().is_empty());

    let stored = store
        .backend()
        .find_one(doc! { "_id": oid }, "authors")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_str("legacy").unwrap(), "kept");
    assert_eq!(stored.get_str("name").unwrap(), "Grace Hopper");
    assert_eq!(stored.get_datetime("joined").unwrap().timestamp_millis(), 0);
    assert_eq!(store.backend().count("authors").await, 1);
}

#[tokio::test]
async fn list_by_filter_honours_options() {
    let store = store();
    let authors = store.repository::<Author>();

    for name in ["Carol", "Alice", "Bob", "Dan"] {
        authors.save(&EntityRef::new(Author::new(name))).await.unwrap();
    }

    let found = authors
        .get_list_by_filter(
            doc! { "name": { "$ne": "Dan" } },
            doc! { "sort": { "name": 1 }, "limit": 2 },
        )
        .await
        .unwrap();

    let names: Vec<_> = found.iter().map(|a| a.read().name.clone()).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[test]
fn cyclic_graph_serializes_with_duplicate_marker() {
    let author = EntityRef::new(Author {
        id: Some(docgraph::identity::generate_identity()),
        ..Author::new("Cyclic")
    });
    let written = book("Loop");
    written.write().author = Some(author.clone());
    author.write().books.push(written.clone());

    let document = GraphSerializer::store().serialize(&*author.read()).unwrap();

    let nested = document.get_array("books").unwrap()[0].as_document().unwrap();
    assert_eq!(nested.get_str("title").unwrap(), "Loop");
    assert_eq!(
        nested.get_str("author").unwrap(),
        format!("dup_{}", author.id().unwrap())
    );
}

#[test]
fn foreign_reference_and_external_view() {
    let author = EntityRef::new(Author {
        id: Some(docgraph::identity::generate_identity()),
        joined: Some(StoreDateTime::from_timestamp(1_076_599_161).unwrap()),
        account: Some(Arc::new(Account("acct-7".into()))),
        ..Author::new("Viewed")
    });

    let stored = GraphSerializer::store().serialize(&*author.read()).unwrap();
    assert_eq!(stored.get_str("accountId").unwrap(), "acct-7");
    assert!(!stored.contains_key("account"));

    let view = to_external_view(&*author.read()).unwrap();
    assert_eq!(
        view,
        serde_json::json!({
            "id": author.id().unwrap(),
            "name": "Viewed",
            "books": [],
            "joined": "2004-02-12T15:19:21+00:00",
            "display": "Viewed (author)",
            "accountId": "acct-7",
        })
    );
}

#[tokio::test]
async fn configured_dynamic_store_saves_and_loads() {
    let store = StoreConfig::from_json(r#"{ "backend": "memory" }"#)
        .unwrap()
        .connect()
        .await
        .unwrap();

    let books = store.repository::<Book>();
    let saved = books
        .save(&EntityRef::new(Book { title: "Dynamic".into(), ..Default::default() }))
        .await
        .unwrap();

    let fetched = books.get_by_id(&saved.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(fetched.read().title, "Dynamic");

    store.shutdown().await.unwrap();
}

#[tokio::test]
async fn identity_field_with_custom_name_survives_resave() {
    let store = store();
    let keyed = store.repository::<Keyed>();

    let saved = keyed
        .save(&EntityRef::new(Keyed { name: "first".into(), ..Default::default() }))
        .await
        .unwrap();
    let key = saved.id().unwrap();

    let fetched = keyed.get_by_id(&key).await.unwrap().unwrap();
    assert_eq!(fetched.read().key.as_deref(), Some(key.as_str()));

    fetched.write().name = "second".into();
    let resaved = keyed.save(&fetched).await.unwrap();

    assert_eq!(resaved.id().unwrap(), key);
    assert_eq!(resaved.read().name, "second");
    assert_eq!(store.backend().count("keyed").await, 1);
}

#[tokio::test]
async fn calendar_fields_round_trip_as_unix_seconds() {
    let store = store();
    let stamps = store.repository::<Stamped>();

    let at = Utc.with_ymd_and_hms(2004, 2, 12, 15, 19, 21).unwrap();
    let saved = stamps
        .save(&EntityRef::new(Stamped { id: None, at, published: Some(true) }))
        .await
        .unwrap();
    let id = saved.id().unwrap();

    let stored = store
        .backend()
        .find_one(doc! { "_id": ObjectId::parse_str(&id).unwrap() }, "stamped")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_i64("at").unwrap(), 1_076_599_161);

    let fetched = stamps.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(fetched.read().at, at);
    assert_eq!(fetched.read().published, Some(true));
}

#[tokio::test]
async fn loosely_typed_flags_are_coerced_on_wake_up() {
    let store = store();
    let stamps = store.repository::<Stamped>();

    let oid = ObjectId::new();
    store
        .backend()
        .insert_one(doc! { "_id": oid, "at": 0_i64, "published": "0" }, "stamped")
        .await
        .unwrap();

    let fetched = stamps.get_by_id(&oid.to_hex()).await.unwrap().unwrap();
    assert_eq!(fetched.read().published, Some(false));
}

#[tokio::test]
async fn nested_unsaved_entities_get_identities_and_resave_cleanly() {
    let store = store();
    let authors = store.repository::<Author>();

    let shared = EntityRef::new(Book { title: "Shared".into(), ..Default::default() });
    let author = EntityRef::new(Author {
        books: vec![shared.clone(), shared.clone()],
        ..Author::new("Sharer")
    });

    let saved = authors.save(&author).await.unwrap();
    let id = saved.id().unwrap();
    let shared_id = shared.id().unwrap();

    let stored = store
        .backend()
        .find_one(doc! { "_id": ObjectId::parse_str(&id).unwrap() }, "authors")
        .await
        .unwrap()
        .unwrap();
    let books = stored.get_array("books").unwrap();
    assert_eq!(
        books[0].as_document().unwrap().get_object_id("_id").unwrap().to_hex(),
        shared_id
    );
    assert_eq!(books[1], Bson::String(format!("dup_{shared_id}")));

    author.write().name = "Renamed".into();
    let resaved = authors.save(&author).await.unwrap();
    let resaved = resaved.read();

    assert_eq!(resaved.name, "Renamed");
    assert!(EntityRef::ptr_eq(&resaved.books[0], &resaved.books[1]));
    assert_eq!(resaved.books[0].id().unwrap(), shared_id);
}

#[test]
fn external_view_binds_back_into_entity() {
    let author = EntityRef::new(Author {
        id: Some(docgraph::identity::generate_identity()),
        books: vec![book("Essays")],
        joined: Some(StoreDateTime::from_timestamp(1_076_599_161).unwrap()),
        ..Author::new("Round")
    });

    let view = to_external_view(&*author.read()).unwrap();
    let rebuilt: Author = from_external_view(view).unwrap();

    assert_eq!(rebuilt.id, author.id());
    assert_eq!(rebuilt.name, "Round");
    assert_eq!(rebuilt.joined.unwrap().timestamp(), 1_076_599_161);
    assert_eq!(rebuilt.display.as_deref(), Some("Round (author)"));
    assert_eq!(rebuilt.books[0].read().title, "Essays");
    assert_eq!(rebuilt.books[0].id(), author.read().books[0].id());
}
