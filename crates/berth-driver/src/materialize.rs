//! Config materialization.
//!
//! After the member's volume is mounted, its config file revisions are
//! written under `<mountPath>/conf/`. Writes are atomic (temp file in
//! the target directory, fsync, rename) so a crash mid-write never
//! leaves a half-written config. Content is verified against the MD5
//! recorded on both the member reference and the file record.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use berth_catalog::Catalog;
use berth_core::{md5_hex, CoreError, CoreResult, ServiceMember};

/// Directory under the mount path that receives config files.
pub const CONF_DIR: &str = "conf";

/// Write all of the member's config files under the mount path.
pub async fn materialize_configs(
    catalog: &dyn Catalog,
    member: &ServiceMember,
    mount_path: &Path,
    requuid: &str,
) -> CoreResult<()> {
    if member.configs.is_empty() {
        return Ok(());
    }
    let conf_dir = mount_path.join(CONF_DIR);
    tokio::fs::create_dir_all(&conf_dir).await?;

    for config in &member.configs {
        let file = catalog
            .get_config_file(&member.service_uuid, &config.file_id)
            .await?;
        if file.file_md5 != config.file_md5 {
            return Err(CoreError::CorruptConfig(format!(
                "member {} references {} with md5 {}, record has {}",
                member.member_name, config.file_id, config.file_md5, file.file_md5
            )));
        }
        file.verify()?;

        let target = conf_dir.join(&file.file_name);
        if file_matches(&target, &file.file_md5).await {
            debug!(%requuid, file = %file.file_name, "config unchanged, skipping");
            continue;
        }

        // Write-to-temp, fsync, rename within the same directory.
        let tmp = conf_dir.join(format!(".{}.tmp", file.file_id));
        let mut out = tokio::fs::File::create(&tmp).await?;
        out.write_all(&file.content).await?;
        out.sync_all().await?;
        drop(out);
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(file.file_mode)).await?;
        tokio::fs::rename(&tmp, &target).await?;

        info!(
            %requuid,
            member = %member.member_name,
            file = %file.file_name,
            file_id = %file.file_id,
            "config materialized"
        );
    }
    Ok(())
}

/// Does the file on disk already carry this content?
async fn file_matches(path: &Path, expected_md5: &str) -> bool {
    match tokio::fs::read(path).await {
        Ok(content) => md5_hex(&content) == expected_md5,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_catalog::MemCatalog;
    use berth_core::{ConfigFile, MemberConfig, MemberVolumes, DEFAULT_HOST_IP};

    fn member_with_configs(uuid: &str, configs: Vec<MemberConfig>) -> ServiceMember {
        ServiceMember::new(
            uuid.to_string(),
            0,
            "svc1-0".to_string(),
            "az-1".to_string(),
            MemberVolumes::default(),
            DEFAULT_HOST_IP.to_string(),
            configs,
        )
    }

    async fn seed_file(catalog: &MemCatalog, uuid: &str, file_id: &str, content: &[u8]) -> ConfigFile {
        let file = ConfigFile::new(
            uuid.to_string(),
            file_id.to_string(),
            "server.conf".to_string(),
            0o600,
            content.to_vec(),
        );
        catalog.create_config_file(&file).await.unwrap();
        file
    }

    #[tokio::test]
    async fn writes_content_with_mode() {
        let catalog = MemCatalog::new();
        let file = seed_file(&catalog, "uuid1", "f1", b"port = 5432\n").await;
        let member = member_with_configs(
            "uuid1",
            vec![MemberConfig {
                file_name: file.file_name.clone(),
                file_id: file.file_id.clone(),
                file_md5: file.file_md5.clone(),
            }],
        );

        let dir = tempfile::tempdir().unwrap();
        materialize_configs(&catalog, &member, dir.path(), "r1")
            .await
            .unwrap();

        let target = dir.path().join(CONF_DIR).join("server.conf");
        let content = std::fs::read(&target).unwrap();
        assert_eq!(content, b"port = 5432\n");
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn stale_member_reference_is_corrupt() {
        let catalog = MemCatalog::new();
        let file = seed_file(&catalog, "uuid1", "f1", b"v1").await;
        let member = member_with_configs(
            "uuid1",
            vec![MemberConfig {
                file_name: file.file_name.clone(),
                file_id: file.file_id.clone(),
                file_md5: "0000deadbeef0000".to_string(),
            }],
        );

        let dir = tempfile::tempdir().unwrap();
        let err = materialize_configs(&catalog, &member, dir.path(), "r1")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CorruptConfig(_)));
    }

    #[tokio::test]
    async fn missing_file_record_surfaces_not_found() {
        let catalog = MemCatalog::new();
        let member = member_with_configs(
            "uuid1",
            vec![MemberConfig {
                file_name: "server.conf".to_string(),
                file_id: "f-missing".to_string(),
                file_md5: "00".to_string(),
            }],
        );

        let dir = tempfile::tempdir().unwrap();
        let err = materialize_configs(&catalog, &member, dir.path(), "r1")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn rotation_replaces_content() {
        let catalog = MemCatalog::new();
        let v1 = seed_file(&catalog, "uuid1", "f1", b"v1").await;
        let member = member_with_configs(
            "uuid1",
            vec![MemberConfig {
                file_name: v1.file_name.clone(),
                file_id: v1.file_id.clone(),
                file_md5: v1.file_md5.clone(),
            }],
        );

        let dir = tempfile::tempdir().unwrap();
        materialize_configs(&catalog, &member, dir.path(), "r1")
            .await
            .unwrap();

        // New revision, swapped reference.
        let v2 = v1.next_revision("f2".to_string(), b"v2".to_vec());
        catalog.create_config_file(&v2).await.unwrap();
        let rotated = member.with_configs(vec![MemberConfig {
            file_name: v2.file_name.clone(),
            file_id: v2.file_id.clone(),
            file_md5: v2.file_md5.clone(),
        }]);

        materialize_configs(&catalog, &rotated, dir.path(), "r2")
            .await
            .unwrap();
        let content = std::fs::read(dir.path().join(CONF_DIR).join("server.conf")).unwrap();
        assert_eq!(content, b"v2");
    }

    #[tokio::test]
    async fn unchanged_content_not_rewritten() {
        let catalog = MemCatalog::new();
        let file = seed_file(&catalog, "uuid1", "f1", b"stable").await;
        let member = member_with_configs(
            "uuid1",
            vec![MemberConfig {
                file_name: file.file_name.clone(),
                file_id: file.file_id.clone(),
                file_md5: file.file_md5.clone(),
            }],
        );

        let dir = tempfile::tempdir().unwrap();
        materialize_configs(&catalog, &member, dir.path(), "r1")
            .await
            .unwrap();
        let target = dir.path().join(CONF_DIR).join("server.conf");
        let mtime1 = std::fs::metadata(&target).unwrap().modified().unwrap();

        materialize_configs(&catalog, &member, dir.path(), "r2")
            .await
            .unwrap();
        let mtime2 = std::fs::metadata(&target).unwrap().modified().unwrap();
        assert_eq!(mtime1, mtime2);
    }
}
