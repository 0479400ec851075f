use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    contacts::{
        dto::AvatarUpload,
        repo_types::{Contact, ContactPatch, NewContact},
    },
    error::{ApiError, ApiResult},
    images::services::{discard_avatar, ext_from_mime, upload_avatar, UploadItem},
    state::AppState,
};

pub const BIRTHDAY_WINDOW_DAYS: i64 = 7;

const NOT_FOUND: ApiError = ApiError::NotFound("Contact not found");

#[instrument(skip(state, new))]
pub async fn create(state: &AppState, new: NewContact) -> ApiResult<Contact> {
    let contact = state.contacts.create(new).await?;
    info!(contact_id = contact.id, "contact created");
    Ok(contact)
}

pub async fn list(state: &AppState, skip: i64, limit: i64) -> ApiResult<Vec<Contact>> {
    Ok(state.contacts.list(skip, limit).await?)
}

pub async fn get(state: &AppState, id: i64) -> ApiResult<Contact> {
    state.contacts.get(id).await?.ok_or(NOT_FOUND)
}

/// Apply `patch`, storing `avatar` on the image host first when present.
/// An uploaded avatar is removed again if the record is not written.
#[instrument(skip(state, patch, avatar))]
pub async fn update(
    state: &AppState,
    id: i64,
    mut patch: ContactPatch,
    avatar: Option<AvatarUpload>,
) -> ApiResult<Contact> {
    let Some(avatar) = avatar else {
        return state.contacts.update(id, patch).await?.ok_or(NOT_FOUND);
    };

    if ext_from_mime(&avatar.content_type).is_none() {
        return Err(ApiError::Validation(format!(
            "unsupported avatar type {}",
            avatar.content_type
        )));
    }
    if state.contacts.get(id).await?.is_none() {
        return Err(NOT_FOUND);
    }

    let image = upload_avatar(
        state.storage.as_ref(),
        UploadItem {
            body: avatar.body,
            content_type: &avatar.content_type,
        },
    )
    .await?;
    patch.avatar_url = Some(image.url.clone());

    match state.contacts.update(id, patch).await {
        Ok(Some(contact)) => {
            info!(contact_id = id, key = %image.key, "avatar replaced");
            Ok(contact)
        }
        Ok(None) => {
            discard_avatar(state.storage.as_ref(), &image).await;
            Err(NOT_FOUND)
        }
        Err(e) => {
            warn!(contact_id = id, "record write failed after avatar upload");
            discard_avatar(state.storage.as_ref(), &image).await;
            Err(e.into())
        }
    }
}

#[instrument(skip(state))]
pub async fn delete(state: &AppState, id: i64) -> ApiResult<Contact> {
    let contact = state.contacts.delete(id).await?.ok_or(NOT_FOUND)?;
    info!(contact_id = id, "contact deleted");
    Ok(contact)
}

pub async fn search(state: &AppState, query: &str) -> ApiResult<Vec<Contact>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::Validation("query must not be empty".into()));
    }
    Ok(state.contacts.search(query).await?)
}

pub async fn upcoming_birthdays(state: &AppState) -> ApiResult<Vec<Contact>> {
    let today = OffsetDateTime::now_utc().date();
    Ok(state
        .contacts
        .upcoming_birthdays(today, BIRTHDAY_WINDOW_DAYS)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::TestKit;
    use crate::storage::fake::FakeStorage;
    use bytes::Bytes;
    use time::Duration;

    fn contact(name: &str, surname: &str, email: &str) -> NewContact {
        NewContact {
            name: name.into(),
            surname: surname.into(),
            email: email.into(),
            phone: None,
            birthday: None,
            additional_data: None,
        }
    }

    fn png() -> AvatarUpload {
        AvatarUpload {
            body: Bytes::from_static(b"\x89PNG"),
            content_type: "image/png".into(),
        }
    }

    #[tokio::test]
    async fn create_get_delete() {
        let kit = TestKit::new();
        let c = create(&kit.state, contact("John", "Doe", "john@doe.io"))
            .await
            .unwrap();
        assert_eq!(get(&kit.state, c.id).await.unwrap(), c);

        let removed = delete(&kit.state, c.id).await.unwrap();
        assert_eq!(removed.id, c.id);
        assert!(matches!(get(&kit.state, c.id).await, Err(ApiError::NotFound(_))));
        assert!(matches!(delete(&kit.state, c.id).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_pages_through_contacts() {
        let kit = TestKit::new();
        for i in 0..5 {
            create(&kit.state, contact(&format!("N{i}"), "S", &format!("n{i}@x.io")))
                .await
                .unwrap();
        }
        let page = list(&kit.state, 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].name, "N1");
        assert!(list(&kit.state, 10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_matches_any_name_field() {
        let kit = TestKit::new();
        create(&kit.state, contact("John", "Doe", "john@example.com"))
            .await
            .unwrap();
        create(&kit.state, contact("Anna", "Smith", "anna@example.com"))
            .await
            .unwrap();

        let hits = search(&kit.state, "doe").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].surname, "Doe");

        assert_eq!(search(&kit.state, "example").await.unwrap().len(), 2);
        assert!(search(&kit.state, "zzz").await.unwrap().is_empty());
        assert!(matches!(
            search(&kit.state, "  ").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn birthdays_inside_the_week_only() {
        let kit = TestKit::new();
        let today = OffsetDateTime::now_utc().date();
        let mut soon = contact("Soon", "A", "soon@x.io");
        soon.birthday = Some(today + Duration::days(3));
        let mut later = contact("Later", "B", "later@x.io");
        later.birthday = Some(today + Duration::days(10));
        create(&kit.state, soon).await.unwrap();
        create(&kit.state, later).await.unwrap();
        create(&kit.state, contact("None", "C", "none@x.io")).await.unwrap();

        let hits = upcoming_birthdays(&kit.state).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Soon");
    }

    #[tokio::test]
    async fn update_without_avatar_keeps_existing_url() {
        let kit = TestKit::new();
        let c = create(&kit.state, contact("John", "Doe", "j@d.io")).await.unwrap();
        let with_avatar = update(&kit.state, c.id, ContactPatch::default(), Some(png()))
            .await
            .unwrap();
        let url = with_avatar.avatar_url.clone().expect("avatar set");

        let patch = ContactPatch {
            phone: Some("555".into()),
            ..Default::default()
        };
        let updated = update(&kit.state, c.id, patch, None).await.unwrap();
        assert_eq!(updated.phone.as_deref(), Some("555"));
        assert_eq!(updated.avatar_url.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn update_with_avatar_stores_image_url() {
        let kit = TestKit::new();
        let c = create(&kit.state, contact("John", "Doe", "j@d.io")).await.unwrap();
        let updated = update(&kit.state, c.id, ContactPatch::default(), Some(png()))
            .await
            .unwrap();
        let keys = kit.storage.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(
            updated.avatar_url,
            Some(format!("https://fake.local/{}", keys[0]))
        );
    }

    #[tokio::test]
    async fn failed_upload_leaves_record_untouched() {
        let kit = TestKit::with_storage(FakeStorage::failing());
        let c = create(&kit.state, contact("John", "Doe", "j@d.io")).await.unwrap();
        let patch = ContactPatch {
            name: Some("Johnny".into()),
            ..Default::default()
        };
        let err = update(&kit.state, c.id, patch, Some(png())).await.unwrap_err();
        assert!(matches!(err, ApiError::Unavailable(_)));
        assert_eq!(get(&kit.state, c.id).await.unwrap(), c);
    }

    #[tokio::test]
    async fn update_missing_contact_uploads_nothing() {
        let kit = TestKit::new();
        let err = update(&kit.state, 42, ContactPatch::default(), Some(png()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(kit.storage.keys().is_empty());
        assert!(matches!(
            update(&kit.state, 42, ContactPatch::default(), None).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_rejects_non_image_avatar() {
        let kit = TestKit::new();
        let c = create(&kit.state, contact("John", "Doe", "j@d.io")).await.unwrap();
        let avatar = AvatarUpload {
            body: Bytes::from_static(b"%PDF"),
            content_type: "application/pdf".into(),
        };
        let err = update(&kit.state, c.id, ContactPatch::default(), Some(avatar))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
